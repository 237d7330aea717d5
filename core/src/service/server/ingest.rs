//! Idempotent batch ingestion of offline orders
//!
//! Items are handled strictly in batch order and each one independently: a
//! rejected item yields an error result and the batch carries on.

use super::orders::{CreateOutcome, OrderError};
use super::ServerContext;
use crate::domain::{IngestResult, IngestStatus, OfflineId, OfflineOrder};
use crate::infra::event::Event;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
	#[error("Invalid offline orders data: batch is empty")]
	EmptyBatch,
}

pub struct OrderIngestor {
	ctx: ServerContext,
}

impl OrderIngestor {
	pub fn new(ctx: ServerContext) -> Self {
		Self { ctx }
	}

	pub async fn ingest(&self, batch: Vec<OfflineOrder>) -> Result<Vec<IngestResult>, IngestError> {
		if batch.is_empty() {
			return Err(IngestError::EmptyBatch);
		}

		let mut results = Vec::with_capacity(batch.len());
		for order in batch {
			results.push(self.ingest_one(order).await);
		}

		log_summary(&results);
		Ok(results)
	}

	/// Ingest loosely-typed items, so that one malformed entry becomes an
	/// error result rather than rejecting the whole request
	pub async fn ingest_values(&self, batch: Vec<Value>) -> Result<Vec<IngestResult>, IngestError> {
		if batch.is_empty() {
			return Err(IngestError::EmptyBatch);
		}

		let mut results = Vec::with_capacity(batch.len());
		for value in batch {
			let offline_id = value
				.get("offlineId")
				.and_then(Value::as_str)
				.map(OfflineId::from)
				.unwrap_or_else(|| OfflineId::from(""));

			let result = match serde_json::from_value::<OfflineOrder>(value) {
				Ok(order) => self.ingest_one(order).await,
				Err(e) => {
					warn!(%offline_id, error = %e, "Malformed offline order");
					IngestResult::error(offline_id, format!("Malformed order: {}", e))
				}
			};
			results.push(result);
		}

		log_summary(&results);
		Ok(results)
	}

	async fn ingest_one(&self, order: OfflineOrder) -> IngestResult {
		let offline_id = order.offline_id.clone();
		let store_id = order.store;

		match self.ctx.orders().create(order.into()).await {
			Ok(CreateOutcome::Created(order)) => {
				self.ctx.events().emit(Event::OrderCreatedFromOffline {
					order_id: order.id,
					offline_id: offline_id.to_string(),
					store_id,
				});
				IngestResult::success(offline_id, order.id)
			}
			Ok(CreateOutcome::Existing(order)) => IngestResult::skipped(offline_id, order.id),
			Err(OrderError::Validation(message)) => {
				warn!(%offline_id, %message, "Offline order rejected");
				IngestResult::error(offline_id, message)
			}
			Err(e) => {
				error!(%offline_id, error = %e, "Failed to ingest offline order");
				IngestResult::error(offline_id, e.to_string())
			}
		}
	}
}

fn log_summary(results: &[IngestResult]) {
	let count = |status: IngestStatus| results.iter().filter(|r| r.status == status).count();
	info!(
		received = results.len(),
		created = count(IngestStatus::Success),
		skipped = count(IngestStatus::Skipped),
		failed = count(IngestStatus::Error),
		"Processed offline order batch"
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{OrderItem, OrderType};
	use crate::infra::db::Database;
	use crate::infra::event::EventBus;
	use chrono::Utc;
	use pretty_assertions::assert_eq;
	use serde_json::json;
	use tempfile::TempDir;
	use uuid::Uuid;

	async fn setup() -> (ServerContext, Uuid, TempDir) {
		let temp_dir = TempDir::new().unwrap();
		let db = Database::open_server(temp_dir.path().join("server.db"))
			.await
			.unwrap();
		let ctx = ServerContext::new(db.conn().clone(), EventBus::default());
		let store = ctx.stores().register(None, "S-001", "Main").await.unwrap();
		(ctx, store.id, temp_dir)
	}

	fn order(store: Uuid, offline_id: &str, quantity: i64) -> OfflineOrder {
		OfflineOrder {
			offline_id: offline_id.into(),
			store,
			customer_name: None,
			items: vec![OrderItem {
				product: "tea".into(),
				name: "Tea".into(),
				quantity,
				base_price: 2.0,
				variations: vec![],
				toppings: vec![],
				subtotal: 2.0 * quantity.max(0) as f64,
			}],
			tax: 0.0,
			order_type: OrderType::Takeaway,
			table_number: None,
			special_instructions: None,
			created_at: Utc::now(),
		}
	}

	fn statuses(results: &[IngestResult]) -> Vec<(&str, IngestStatus)> {
		results
			.iter()
			.map(|r| (r.offline_id.as_str(), r.status))
			.collect()
	}

	#[tokio::test]
	async fn test_replayed_batch_is_skipped() {
		let (ctx, store, _temp) = setup().await;
		let ingestor = ctx.ingestor();
		let batch = vec![order(store, "c-1", 1), order(store, "c-2", 1)];

		let first = ingestor.ingest(batch.clone()).await.unwrap();
		let second = ingestor.ingest(batch).await.unwrap();

		assert_eq!(
			statuses(&first),
			vec![("c-1", IngestStatus::Success), ("c-2", IngestStatus::Success)]
		);
		assert_eq!(
			statuses(&second),
			vec![("c-1", IngestStatus::Skipped), ("c-2", IngestStatus::Skipped)]
		);
		assert_eq!(first[0].entity_id, second[0].entity_id);
		assert_eq!(second[0].message.as_deref(), Some("already exists"));
		assert_eq!(ctx.orders().count().await.unwrap(), 2);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_concurrent_redelivery_commits_once() {
		let (ctx, store, _temp) = setup().await;
		let first_tab = ctx.ingestor();
		let second_tab = ctx.ingestor();
		let same = order(store, "c-9", 2);

		let (a, b) = tokio::join!(
			first_tab.ingest(vec![same.clone()]),
			second_tab.ingest(vec![same.clone()])
		);
		let mut outcomes = vec![a.unwrap().remove(0), b.unwrap().remove(0)];
		outcomes.sort_by_key(|r| r.status == IngestStatus::Skipped);

		assert_eq!(outcomes[0].status, IngestStatus::Success);
		assert_eq!(outcomes[1].status, IngestStatus::Skipped);
		assert_eq!(outcomes[0].entity_id, outcomes[1].entity_id);
		assert_eq!(
			ctx.orders().count_by_offline_id(&same.offline_id).await.unwrap(),
			1
		);
	}

	#[tokio::test]
	async fn test_bad_item_does_not_abort_batch() {
		let (ctx, store, _temp) = setup().await;
		let mut events = ctx.events().subscribe();

		let results = ctx
			.ingestor()
			.ingest(vec![
				order(store, "c-1", 1),
				order(store, "c-2", 0),
				order(store, "c-3", 2),
			])
			.await
			.unwrap();

		assert_eq!(
			statuses(&results),
			vec![
				("c-1", IngestStatus::Success),
				("c-2", IngestStatus::Error),
				("c-3", IngestStatus::Success),
			]
		);
		assert!(results[1].message.is_some());
		assert!(results[1].entity_id.is_none());

		let created = events
			.recv_filtered(|e| matches!(e, Event::OrderCreatedFromOffline { .. }))
			.await
			.unwrap();
		assert!(matches!(
			created,
			Event::OrderCreatedFromOffline { ref offline_id, .. } if offline_id == "c-1"
		));
	}

	#[tokio::test]
	async fn test_duplicates_within_one_batch_commit_once() {
		let (ctx, store, _temp) = setup().await;

		let results = ctx
			.ingestor()
			.ingest(vec![order(store, "c-9", 1), order(store, "c-9", 1)])
			.await
			.unwrap();

		assert_eq!(
			statuses(&results),
			vec![("c-9", IngestStatus::Success), ("c-9", IngestStatus::Skipped)]
		);
		assert_eq!(
			ctx.orders().count_by_offline_id(&"c-9".into()).await.unwrap(),
			1
		);
	}

	#[tokio::test]
	async fn test_empty_batch_is_rejected() {
		let (ctx, _store, _temp) = setup().await;

		assert!(matches!(
			ctx.ingestor().ingest(vec![]).await,
			Err(IngestError::EmptyBatch)
		));
	}

	#[tokio::test]
	async fn test_malformed_values_become_error_results() {
		let (ctx, store, _temp) = setup().await;
		let good = serde_json::to_value(order(store, "c-1", 1)).unwrap();

		let results = ctx
			.ingestor()
			.ingest_values(vec![json!({ "offlineId": "c-0", "items": "nope" }), good])
			.await
			.unwrap();

		assert_eq!(
			statuses(&results),
			vec![("c-0", IngestStatus::Error), ("c-1", IngestStatus::Success)]
		);
	}
}
