//! Durable mutation queue
//!
//! Client-side store of writes that still need server acknowledgment, plus
//! the offline order drafts they carry, the read-through catalog cache and a
//! small key/value settings table. Every mutating call runs in one database
//! transaction, so a crash leaves either the old or the new state.

use crate::domain::{
	CatalogItem, CatalogKind, Headers, HttpMethod, Mutation, MutationError, OfflineId,
	OfflineOrder, OperationId, PendingOperation,
};
use crate::infra::db::entities::{
	cached_category, cached_product, offline_order, pending_request, setting,
};
use chrono::Utc;
use futures::stream::{self, Stream, TryStreamExt};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
	PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Setting key holding the ISO timestamp of the last pass that delivered data
pub const LAST_SYNC_TIME: &str = "lastSyncTime";

const OFFLINE_ID_SEQUENCE: &str = "offlineIdSequence";

const DEFAULT_PAGE_SIZE: u64 = 64;

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("Database error: {0}")]
	Database(#[from] DbErr),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid mutation: {0}")]
	InvalidMutation(#[from] MutationError),

	#[error("Corrupt queue entry {id}: {reason}")]
	Corrupt { id: OperationId, reason: String },

	#[error("Operation {0} not found")]
	NotFound(OperationId),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Outcome of recording a failed delivery attempt
#[derive(Debug, Clone)]
pub struct FailureRecord {
	pub operation: PendingOperation,
	/// True when this failure made the operation reach the attempt bound
	pub became_stuck: bool,
}

pub struct MutationQueue {
	db: DatabaseConnection,
	client_id: String,
	max_attempts: u32,
	page_size: u64,
}

impl MutationQueue {
	pub fn new(db: DatabaseConnection, client_id: impl Into<String>, max_attempts: u32) -> Self {
		Self {
			db,
			client_id: client_id.into(),
			max_attempts: max_attempts.max(1),
			page_size: DEFAULT_PAGE_SIZE,
		}
	}

	/// Override how many rows `peek_ordered` loads per round trip
	pub fn with_page_size(mut self, page_size: u64) -> Self {
		self.page_size = page_size.max(1);
		self
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	// ---- Pending operations ----

	/// Durably append a write. Creation mutations also store their draft in
	/// the offline order collection, in the same transaction.
	pub async fn enqueue(&self, mutation: Mutation, headers: Headers) -> Result<OperationId> {
		mutation.validate()?;

		let payload = serde_json::to_string(&mutation)?;
		let headers_json = serde_json::to_string(&headers)?;
		let now = Utc::now();

		let txn = self.db.begin().await?;

		if let Some(order) = mutation.as_offline_order() {
			let draft = offline_order::ActiveModel {
				offline_id: Set(order.offline_id.to_string()),
				store_id: Set(order.store),
				payload: Set(serde_json::to_string(order)?),
				created_at: Set(order.created_at),
			};

			// Re-enqueueing the same draft keeps a single row
			offline_order::Entity::insert(draft)
				.on_conflict(
					OnConflict::column(offline_order::Column::OfflineId)
						.update_columns([offline_order::Column::Payload])
						.to_owned(),
				)
				.exec(&txn)
				.await?;
		}

		let model = pending_request::ActiveModel {
			kind: Set(mutation.kind().to_string()),
			target: Set(mutation.target()),
			method: Set(mutation.method().as_str().to_string()),
			stream_key: Set(mutation.stream_key()),
			payload: Set(payload),
			headers: Set(headers_json),
			offline_id: Set(mutation.offline_id().map(|id| id.to_string())),
			enqueued_at: Set(now),
			attempt_count: Set(0),
			last_error: Set(None),
			last_attempt_at: Set(None),
			..Default::default()
		}
		.insert(&txn)
		.await?;

		txn.commit().await?;

		debug!(
			operation_id = model.id,
			kind = %model.kind,
			target = %model.target,
			"Queued operation"
		);

		Ok(model.id)
	}

	/// Lazily page through the queue in strict enqueue order
	pub fn peek_ordered(&self) -> impl Stream<Item = Result<PendingOperation>> + Send + '_ {
		self.peek_ordered_after(None)
	}

	/// Resume an ordered scan after the last id a previous scan yielded
	pub fn peek_ordered_after(
		&self,
		after: Option<OperationId>,
	) -> impl Stream<Item = Result<PendingOperation>> + Send + '_ {
		struct Cursor {
			after: Option<OperationId>,
			buffer: VecDeque<PendingOperation>,
			exhausted: bool,
		}

		let cursor = Cursor {
			after,
			buffer: VecDeque::new(),
			exhausted: false,
		};

		stream::unfold(cursor, move |mut cursor| async move {
			if cursor.buffer.is_empty() && !cursor.exhausted {
				match self.fetch_page(cursor.after).await {
					Ok(page) => {
						if (page.len() as u64) < self.page_size {
							cursor.exhausted = true;
						}
						cursor.buffer.extend(page);
					}
					Err(e) => {
						cursor.exhausted = true;
						return Some((Err(e), cursor));
					}
				}
			}

			let operation = cursor.buffer.pop_front()?;
			cursor.after = Some(operation.id);
			Some((Ok(operation), cursor))
		})
	}

	async fn fetch_page(&self, after: Option<OperationId>) -> Result<Vec<PendingOperation>> {
		let mut query = pending_request::Entity::find();
		if let Some(after) = after {
			query = query.filter(pending_request::Column::Id.gt(after));
		}

		query
			.order_by_asc(pending_request::Column::Id)
			.limit(self.page_size)
			.all(&self.db)
			.await?
			.into_iter()
			.map(to_operation)
			.collect()
	}

	/// Every queued operation, in enqueue order
	pub async fn snapshot(&self) -> Result<Vec<PendingOperation>> {
		self.peek_ordered().try_collect().await
	}

	pub async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>> {
		pending_request::Entity::find_by_id(id)
			.one(&self.db)
			.await?
			.map(to_operation)
			.transpose()
	}

	/// Delete an acknowledged operation (and its draft). Returns false if it
	/// was already gone.
	pub async fn remove(&self, id: OperationId) -> Result<bool> {
		let txn = self.db.begin().await?;

		let Some(model) = pending_request::Entity::find_by_id(id).one(&txn).await? else {
			return Ok(false);
		};

		if let Some(offline_id) = &model.offline_id {
			offline_order::Entity::delete_by_id(offline_id.clone())
				.exec(&txn)
				.await?;
		}
		pending_request::Entity::delete_by_id(id).exec(&txn).await?;

		txn.commit().await?;

		debug!(operation_id = id, "Removed acknowledged operation");
		Ok(true)
	}

	/// Count a failed delivery attempt against an operation
	pub async fn record_failure(&self, id: OperationId, error: &str) -> Result<FailureRecord> {
		let txn = self.db.begin().await?;

		let model = pending_request::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(QueueError::NotFound(id))?;

		let attempts = model.attempt_count.saturating_add(1);
		let mut active: pending_request::ActiveModel = model.into();
		active.attempt_count = Set(attempts);
		active.last_error = Set(Some(error.to_string()));
		active.last_attempt_at = Set(Some(Utc::now()));
		let model = active.update(&txn).await?;

		txn.commit().await?;

		let operation = to_operation(model)?;
		let became_stuck = operation.attempt_count == self.max_attempts;
		if became_stuck {
			warn!(
				operation_id = id,
				attempts = operation.attempt_count,
				error,
				"Operation reached its attempt bound and will no longer be retried"
			);
		}

		Ok(FailureRecord {
			operation,
			became_stuck,
		})
	}

	/// Operations that exhausted their attempts and need a decision
	pub async fn stuck(&self) -> Result<Vec<PendingOperation>> {
		pending_request::Entity::find()
			.filter(pending_request::Column::AttemptCount.gte(self.max_attempts as i32))
			.order_by_asc(pending_request::Column::Id)
			.all(&self.db)
			.await?
			.into_iter()
			.map(to_operation)
			.collect()
	}

	/// Give a stuck operation a fresh set of attempts
	pub async fn retry(&self, id: OperationId) -> Result<PendingOperation> {
		let txn = self.db.begin().await?;

		let model = pending_request::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(QueueError::NotFound(id))?;

		let mut active: pending_request::ActiveModel = model.into();
		active.attempt_count = Set(0);
		let model = active.update(&txn).await?;

		txn.commit().await?;

		info!(operation_id = id, "Operation reset for retry");
		to_operation(model)
	}

	/// Drop an operation without delivering it
	pub async fn discard(&self, id: OperationId) -> Result<PendingOperation> {
		let operation = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
		self.remove(id).await?;

		warn!(
			operation_id = id,
			kind = operation.mutation.kind(),
			"Operation discarded without delivery"
		);
		Ok(operation)
	}

	/// Total queued operations, stuck ones included
	pub async fn len(&self) -> Result<u64> {
		Ok(pending_request::Entity::find().count(&self.db).await?)
	}

	pub async fn is_empty(&self) -> Result<bool> {
		Ok(self.len().await? == 0)
	}

	/// Queued operations that are still eligible for replay
	pub async fn pending_count(&self) -> Result<u64> {
		Ok(pending_request::Entity::find()
			.filter(pending_request::Column::AttemptCount.lt(self.max_attempts as i32))
			.count(&self.db)
			.await?)
	}

	// ---- Offline orders ----

	/// Allocate the next offline id for this client
	pub async fn next_offline_id(&self) -> Result<OfflineId> {
		let txn = self.db.begin().await?;

		let current = read_setting(&txn, OFFLINE_ID_SEQUENCE)
			.await?
			.and_then(|value| value.as_u64())
			.unwrap_or(0);
		let next = current + 1;
		write_setting(&txn, OFFLINE_ID_SEQUENCE, &Value::from(next)).await?;

		txn.commit().await?;

		Ok(OfflineId::new(&self.client_id, next))
	}

	/// Drafts not yet acknowledged by the server, oldest first
	pub async fn offline_orders(&self) -> Result<Vec<OfflineOrder>> {
		offline_order::Entity::find()
			.order_by_asc(offline_order::Column::CreatedAt)
			.all(&self.db)
			.await?
			.into_iter()
			.map(|model| -> Result<OfflineOrder> { Ok(serde_json::from_str(&model.payload)?) })
			.collect()
	}

	// ---- Catalog cache ----

	/// Replace a cached collection wholesale
	pub async fn replace_catalog(&self, kind: CatalogKind, items: Vec<CatalogItem>) -> Result<()> {
		let now = Utc::now();
		let count = items.len();
		let txn = self.db.begin().await?;

		match kind {
			CatalogKind::Products => {
				cached_product::Entity::delete_many().exec(&txn).await?;
				for item in items {
					let model = cached_product::ActiveModel {
						id: Set(item.id),
						data: Set(serde_json::to_string(&item.data)?),
						cached_at: Set(now),
					};
					cached_product::Entity::insert(model)
						.on_conflict(
							OnConflict::column(cached_product::Column::Id)
								.update_columns([cached_product::Column::Data])
								.to_owned(),
						)
						.exec(&txn)
						.await?;
				}
			}
			CatalogKind::Categories => {
				cached_category::Entity::delete_many().exec(&txn).await?;
				for item in items {
					let model = cached_category::ActiveModel {
						id: Set(item.id),
						data: Set(serde_json::to_string(&item.data)?),
						cached_at: Set(now),
					};
					cached_category::Entity::insert(model)
						.on_conflict(
							OnConflict::column(cached_category::Column::Id)
								.update_columns([cached_category::Column::Data])
								.to_owned(),
						)
						.exec(&txn)
						.await?;
				}
			}
		}

		txn.commit().await?;

		debug!(?kind, count, "Replaced cached catalog");
		Ok(())
	}

	pub async fn replace_products(&self, items: Vec<CatalogItem>) -> Result<()> {
		self.replace_catalog(CatalogKind::Products, items).await
	}

	pub async fn replace_categories(&self, items: Vec<CatalogItem>) -> Result<()> {
		self.replace_catalog(CatalogKind::Categories, items).await
	}

	pub async fn cached(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>> {
		let rows: Vec<(String, String)> = match kind {
			CatalogKind::Products => cached_product::Entity::find()
				.order_by_asc(cached_product::Column::Id)
				.all(&self.db)
				.await?
				.into_iter()
				.map(|m| (m.id, m.data))
				.collect(),
			CatalogKind::Categories => cached_category::Entity::find()
				.order_by_asc(cached_category::Column::Id)
				.all(&self.db)
				.await?
				.into_iter()
				.map(|m| (m.id, m.data))
				.collect(),
		};

		rows.into_iter()
			.map(|(id, data)| -> Result<CatalogItem> {
				Ok(CatalogItem {
					id,
					data: serde_json::from_str(&data)?,
				})
			})
			.collect()
	}

	pub async fn cached_products(&self) -> Result<Vec<CatalogItem>> {
		self.cached(CatalogKind::Products).await
	}

	pub async fn cached_categories(&self) -> Result<Vec<CatalogItem>> {
		self.cached(CatalogKind::Categories).await
	}

	// ---- Settings ----

	pub async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
		read_setting(&self.db, key).await
	}

	pub async fn put_setting(&self, key: &str, value: &Value) -> Result<()> {
		let txn = self.db.begin().await?;
		write_setting(&txn, key, value).await?;
		txn.commit().await?;
		Ok(())
	}
}

async fn read_setting<C: ConnectionTrait>(conn: &C, key: &str) -> Result<Option<Value>> {
	setting::Entity::find_by_id(key.to_string())
		.one(conn)
		.await?
		.map(|model| -> Result<Value> { Ok(serde_json::from_str(&model.value)?) })
		.transpose()
}

async fn write_setting<C: ConnectionTrait>(conn: &C, key: &str, value: &Value) -> Result<()> {
	let model = setting::ActiveModel {
		key: Set(key.to_string()),
		value: Set(serde_json::to_string(value)?),
		updated_at: Set(Utc::now()),
	};

	setting::Entity::insert(model)
		.on_conflict(
			OnConflict::column(setting::Column::Key)
				.update_columns([setting::Column::Value, setting::Column::UpdatedAt])
				.to_owned(),
		)
		.exec(conn)
		.await?;

	Ok(())
}

fn to_operation(model: pending_request::Model) -> Result<PendingOperation> {
	let mutation: Mutation = serde_json::from_str(&model.payload)?;
	let headers: Headers = serde_json::from_str(&model.headers)?;
	let method = HttpMethod::from_str(&model.method).ok_or_else(|| QueueError::Corrupt {
		id: model.id,
		reason: format!("unknown method {}", model.method),
	})?;

	Ok(PendingOperation {
		id: model.id,
		mutation,
		target: model.target,
		method,
		headers,
		enqueued_at: model.enqueued_at,
		attempt_count: model.attempt_count.max(0) as u32,
		last_error: model.last_error,
		last_attempt_at: model.last_attempt_at,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{OrderChanges, OrderItem, OrderStatus, OrderType};
	use crate::infra::db::Database;
	use futures::StreamExt;
	use pretty_assertions::assert_eq;
	use serde_json::json;
	use tempfile::TempDir;
	use uuid::Uuid;

	async fn create_test_queue(max_attempts: u32) -> (MutationQueue, Database, TempDir) {
		let temp_dir = TempDir::new().unwrap();
		let db = Database::open_client(temp_dir.path().join("client.db"))
			.await
			.unwrap();
		let queue = MutationQueue::new(db.conn().clone(), "register-1", max_attempts);
		(queue, db, temp_dir)
	}

	fn draft(offline_id: OfflineId) -> Mutation {
		Mutation::CreateOrder {
			order: OfflineOrder {
				offline_id,
				store: Uuid::new_v4(),
				customer_name: Some("Ada".into()),
				items: vec![OrderItem {
					product: "latte".into(),
					name: "Latte".into(),
					quantity: 2,
					base_price: 3.5,
					variations: vec![],
					toppings: vec![],
					subtotal: 7.0,
				}],
				tax: 0.7,
				order_type: OrderType::Takeaway,
				table_number: None,
				special_instructions: None,
				created_at: Utc::now(),
			},
		}
	}

	fn status_change(order_id: Uuid, status: OrderStatus) -> Mutation {
		Mutation::ChangeOrderStatus {
			order_id,
			status,
			note: None,
		}
	}

	#[tokio::test]
	async fn test_enqueue_preserves_order() {
		let (queue, _db, _temp) = create_test_queue(5).await;
		let order_id = Uuid::new_v4();

		let a = queue.enqueue(draft("register-1-a".into()), Headers::new()).await.unwrap();
		let b = queue
			.enqueue(status_change(order_id, OrderStatus::Preparing), Headers::new())
			.await
			.unwrap();
		let c = queue
			.enqueue(status_change(order_id, OrderStatus::Ready), Headers::new())
			.await
			.unwrap();

		let ids: Vec<_> = queue.snapshot().await.unwrap().iter().map(|op| op.id).collect();
		assert_eq!(ids, vec![a, b, c]);
		assert!(a < b && b < c);
		assert_eq!(queue.len().await.unwrap(), 3);
	}

	#[tokio::test]
	async fn test_peek_is_paged_and_restartable() {
		let temp_dir = TempDir::new().unwrap();
		let db = Database::open_client(temp_dir.path().join("client.db"))
			.await
			.unwrap();
		let queue = MutationQueue::new(db.conn().clone(), "register-1", 5).with_page_size(2);
		let order_id = Uuid::new_v4();

		let mut ids = Vec::new();
		for status in [
			OrderStatus::Confirmed,
			OrderStatus::Preparing,
			OrderStatus::Ready,
			OrderStatus::Completed,
			OrderStatus::Cancelled,
		] {
			ids.push(
				queue
					.enqueue(status_change(order_id, status), Headers::new())
					.await
					.unwrap(),
			);
		}

		let first_two: Vec<_> = queue
			.peek_ordered()
			.take(2)
			.map(|op| op.unwrap().id)
			.collect()
			.await;
		assert_eq!(first_two, ids[..2].to_vec());

		let rest: Vec<_> = queue
			.peek_ordered_after(Some(first_two[1]))
			.map(|op| op.unwrap().id)
			.collect()
			.await;
		assert_eq!(rest, ids[2..].to_vec());
	}

	#[tokio::test]
	async fn test_draft_lives_with_its_operation() {
		let (queue, _db, _temp) = create_test_queue(5).await;
		let offline_id = queue.next_offline_id().await.unwrap();

		let id = queue
			.enqueue(draft(offline_id.clone()), Headers::new())
			.await
			.unwrap();
		let drafts = queue.offline_orders().await.unwrap();
		assert_eq!(drafts.len(), 1);
		assert_eq!(drafts[0].offline_id, offline_id);

		assert!(queue.remove(id).await.unwrap());
		assert!(queue.offline_orders().await.unwrap().is_empty());
		assert!(queue.is_empty().await.unwrap());

		// Removing twice is harmless
		assert!(!queue.remove(id).await.unwrap());
	}

	#[tokio::test]
	async fn test_invalid_mutation_is_never_queued() {
		let (queue, _db, _temp) = create_test_queue(5).await;

		let result = queue
			.enqueue(
				Mutation::UpdateOrder {
					order_id: Uuid::new_v4(),
					base_version: 1,
					changes: OrderChanges::default(),
				},
				Headers::new(),
			)
			.await;

		assert!(matches!(result, Err(QueueError::InvalidMutation(_))));
		assert_eq!(queue.len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_failures_make_an_operation_stuck() {
		let (queue, _db, _temp) = create_test_queue(2).await;
		let id = queue.enqueue(draft("register-1-x".into()), Headers::new()).await.unwrap();

		let first = queue.record_failure(id, "connection refused").await.unwrap();
		assert!(!first.became_stuck);
		assert_eq!(queue.pending_count().await.unwrap(), 1);

		let second = queue.record_failure(id, "connection refused").await.unwrap();
		assert!(second.became_stuck);
		assert_eq!(second.operation.attempt_count, 2);
		assert_eq!(second.operation.last_error.as_deref(), Some("connection refused"));
		assert!(second.operation.last_attempt_at.is_some());

		assert_eq!(queue.pending_count().await.unwrap(), 0);
		assert_eq!(queue.len().await.unwrap(), 1);
		assert_eq!(queue.stuck().await.unwrap()[0].id, id);

		let retried = queue.retry(id).await.unwrap();
		assert_eq!(retried.attempt_count, 0);
		assert!(queue.stuck().await.unwrap().is_empty());

		let discarded = queue.discard(id).await.unwrap();
		assert_eq!(discarded.id, id);
		assert!(queue.is_empty().await.unwrap());
		assert!(matches!(queue.retry(id).await, Err(QueueError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_catalog_is_replaced_wholesale() {
		let (queue, _db, _temp) = create_test_queue(5).await;

		let first = vec![
			CatalogItem::from_value(json!({ "_id": "a", "name": "Espresso" })).unwrap(),
			CatalogItem::from_value(json!({ "_id": "b", "name": "Latte" })).unwrap(),
		];
		queue.replace_products(first).await.unwrap();

		let second = vec![CatalogItem::from_value(json!({ "_id": "c", "name": "Mocha" })).unwrap()];
		queue.replace_products(second).await.unwrap();

		let cached = queue.cached_products().await.unwrap();
		assert_eq!(cached.len(), 1);
		assert_eq!(cached[0].id, "c");
		assert_eq!(cached[0].data["name"], "Mocha");
		assert!(queue.cached_categories().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_offline_ids_survive_restart() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("client.db");

		let first = {
			let db = Database::open_client(&path).await.unwrap();
			let queue = MutationQueue::new(db.conn().clone(), "register-9", 5);
			let id = queue.next_offline_id().await.unwrap();
			queue.enqueue(draft(id.clone()), Headers::new()).await.unwrap();
			db.close().await.unwrap();
			id
		};

		let db = Database::open_client(&path).await.unwrap();
		let queue = MutationQueue::new(db.conn().clone(), "register-9", 5);
		let second = queue.next_offline_id().await.unwrap();

		assert!(second > first);
		assert_eq!(queue.len().await.unwrap(), 1);
		assert_eq!(queue.offline_orders().await.unwrap()[0].offline_id, first);
	}

	#[tokio::test]
	async fn test_settings_round_trip() {
		let (queue, _db, _temp) = create_test_queue(5).await;

		assert_eq!(queue.get_setting(LAST_SYNC_TIME).await.unwrap(), None);
		queue
			.put_setting(LAST_SYNC_TIME, &json!("2025-03-01T10:00:00Z"))
			.await
			.unwrap();
		queue
			.put_setting(LAST_SYNC_TIME, &json!("2025-03-01T11:00:00Z"))
			.await
			.unwrap();

		assert_eq!(
			queue.get_setting(LAST_SYNC_TIME).await.unwrap(),
			Some(json!("2025-03-01T11:00:00Z"))
		);
	}
}
