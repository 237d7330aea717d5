//! Write interceptor
//!
//! Business code sends every mutating call through here. When the server is
//! reachable the call goes straight through and the server's answer comes
//! back unchanged. When it is not, the call is enqueued once and the caller
//! gets an "accepted, queued" receipt instead.

use super::connectivity::{Connectivity, ConnectivityMonitor};
use super::http::CLIENT_ID_HEADER;
use super::queue::{MutationQueue, QueueError};
use super::transport::{SyncTransport, TransportError};
use crate::domain::{
	Catalog, CatalogItem, CatalogKind, Headers, Mutation, MutationError, OperationId,
	OrderChanges, OrderDraft, OrderStatus,
};
use crate::infra::event::{Event, EventBus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const OFFLINE_READ_MESSAGE: &str =
	"You are currently offline. Cached data is shown and will refresh when you reconnect.";

#[derive(Debug, Error)]
pub enum InterceptError {
	/// A read could not reach the server; cached data may be used instead
	#[error("Offline: {0}")]
	Offline(String),

	#[error("Invalid request: {0}")]
	Invalid(#[from] MutationError),

	#[error("Request rejected ({status}): {message}")]
	Rejected { status: u16, message: String },

	#[error("Conflict: {message}")]
	Conflict { message: String, current: Value },

	#[error("Server error ({status}): {message}")]
	ServerFault { status: u16, message: String },

	#[error("Malformed response: {0}")]
	Decode(String),

	#[error("Failed to queue request for offline processing: {0}")]
	Queue(#[from] QueueError),
}

impl InterceptError {
	/// Map a transport failure that is not a plain unreachability
	fn from_transport(err: TransportError) -> Self {
		match err {
			TransportError::Unreachable(_) => InterceptError::Offline(OFFLINE_READ_MESSAGE.to_string()),
			TransportError::Rejected { status, message } => {
				InterceptError::Rejected { status, message }
			}
			TransportError::Conflict { message, current } => {
				InterceptError::Conflict { message, current }
			}
			TransportError::ServerFault { status, message } => {
				InterceptError::ServerFault { status, message }
			}
			TransportError::Decode(message) => InterceptError::Decode(message),
		}
	}
}

/// Receipt handed back when a write was captured for later replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedReceipt {
	pub accepted: bool,
	pub queued: bool,
	pub operation_id: OperationId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offline_id: Option<String>,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
	/// The server applied the write; this is its response body
	Delivered(Value),
	/// The write is in the local queue
	Queued(QueuedReceipt),
}

impl WriteOutcome {
	pub fn is_queued(&self) -> bool {
		matches!(self, WriteOutcome::Queued(_))
	}

	/// The value business code sees: the server response or the receipt
	pub fn into_value(self) -> Value {
		match self {
			WriteOutcome::Delivered(value) => value,
			WriteOutcome::Queued(receipt) => serde_json::to_value(receipt).unwrap_or(Value::Null),
		}
	}
}

pub struct WriteInterceptor {
	transport: Arc<dyn SyncTransport>,
	queue: Arc<MutationQueue>,
	monitor: Arc<ConnectivityMonitor>,
	events: EventBus,
}

impl WriteInterceptor {
	pub fn new(
		transport: Arc<dyn SyncTransport>,
		queue: Arc<MutationQueue>,
		monitor: Arc<ConnectivityMonitor>,
		events: EventBus,
	) -> Self {
		Self {
			transport,
			queue,
			monitor,
			events,
		}
	}

	/// Attempt delivery of a mutating call, queueing it if the server cannot
	/// be reached. Application errors (4xx, 5xx) propagate and are not queued.
	pub async fn submit(&self, mutation: Mutation) -> Result<WriteOutcome, InterceptError> {
		mutation.validate()?;
		let headers = self.headers_for(&mutation);

		match self.transport.send(&mutation, &headers).await {
			Ok(response) => {
				self.monitor.report(Connectivity::Reachable);
				debug!(kind = mutation.kind(), "Write delivered directly");
				Ok(WriteOutcome::Delivered(response))
			}
			Err(TransportError::Unreachable(reason)) => {
				self.monitor.report(Connectivity::Unreachable);

				let kind = mutation.kind();
				let offline_id = mutation.offline_id().map(|id| id.to_string());
				let operation_id = self.queue.enqueue(mutation, headers).await?;

				info!(
					operation_id,
					kind,
					%reason,
					"Server unreachable, write queued for offline processing"
				);
				self.events.emit(Event::OperationQueued {
					operation_id,
					kind: kind.to_string(),
				});

				Ok(WriteOutcome::Queued(QueuedReceipt {
					accepted: true,
					queued: true,
					operation_id,
					offline_id,
					message: "Request queued for processing when online".to_string(),
				}))
			}
			Err(err) => {
				// The server answered, so it is reachable even though it refused
				self.monitor.report(Connectivity::Reachable);
				warn!(kind = mutation.kind(), error = %err, "Write rejected by server");
				Err(InterceptError::from_transport(err))
			}
		}
	}

	/// Create an order. The offline id is assigned before the first attempt
	/// so a later replay of the same draft is deduplicated by the server.
	pub async fn create_order(&self, draft: OrderDraft) -> Result<WriteOutcome, InterceptError> {
		let offline_id = self.queue.next_offline_id().await?;
		let order = draft.into_offline(offline_id, Utc::now());
		self.submit(Mutation::CreateOrder { order }).await
	}

	pub async fn update_order_status(
		&self,
		order_id: Uuid,
		status: OrderStatus,
		note: Option<String>,
	) -> Result<WriteOutcome, InterceptError> {
		self.submit(Mutation::ChangeOrderStatus {
			order_id,
			status,
			note,
		})
		.await
	}

	pub async fn update_order(
		&self,
		order_id: Uuid,
		base_version: i64,
		changes: OrderChanges,
	) -> Result<WriteOutcome, InterceptError> {
		self.submit(Mutation::UpdateOrder {
			order_id,
			base_version,
			changes,
		})
		.await
	}

	/// Read a resource from the server. Reads are never queued; when the
	/// server is unreachable this fails with [`InterceptError::Offline`].
	pub async fn read(&self, path: &str) -> Result<Value, InterceptError> {
		match self.transport.fetch(path).await {
			Ok(value) => {
				self.monitor.report(Connectivity::Reachable);
				Ok(value)
			}
			Err(err) => {
				if err.is_unreachable() {
					self.monitor.report(Connectivity::Unreachable);
				}
				Err(InterceptError::from_transport(err))
			}
		}
	}

	/// Fetch products and categories and replace the local cache wholesale
	pub async fn refresh_catalog(&self) -> Result<Catalog, InterceptError> {
		let products = self.fetch_collection(CatalogKind::Products).await?;
		let categories = self.fetch_collection(CatalogKind::Categories).await?;

		self.queue.replace_products(products.clone()).await?;
		self.queue.replace_categories(categories.clone()).await?;

		info!(
			products = products.len(),
			categories = categories.len(),
			"Catalog cache refreshed"
		);

		Ok(Catalog {
			products,
			categories,
			stale: false,
		})
	}

	/// The catalog, fresh when the server answers, otherwise the cached copy
	/// flagged as stale
	pub async fn catalog(&self) -> Result<Catalog, InterceptError> {
		match self.refresh_catalog().await {
			Ok(catalog) => Ok(catalog),
			Err(InterceptError::Offline(_)) => Ok(Catalog {
				products: self.queue.cached_products().await?,
				categories: self.queue.cached_categories().await?,
				stale: true,
			}),
			Err(err) => Err(err),
		}
	}

	async fn fetch_collection(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, InterceptError> {
		let value = self.read(kind.path()).await?;
		let Value::Array(entries) = value else {
			return Err(InterceptError::Decode(format!(
				"expected an array from {}",
				kind.path()
			)));
		};

		Ok(entries.into_iter().filter_map(CatalogItem::from_value).collect())
	}

	fn headers_for(&self, mutation: &Mutation) -> Headers {
		let mut headers = Headers::new();
		headers.insert(CLIENT_ID_HEADER.to_string(), self.queue.client_id().to_string());
		if let Some(offline_id) = mutation.offline_id() {
			headers.insert(IDEMPOTENCY_KEY_HEADER.to_string(), offline_id.to_string());
		}
		headers
	}
}
