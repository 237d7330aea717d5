//! In-process transport that calls the server services directly
//!
//! Stands in for the HTTP layer: service errors are mapped onto the same
//! transport errors the HTTP transport derives from status codes.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use pos_sync_core::{
	domain::{
		CompleteSession, Headers, IngestResult, Mutation, OfflineOrder, OrderPatch,
		ProgressUpdate, StartSession, SyncSession,
	},
	service::{
		client::{SyncTransport, TransportError},
		server::{OrderError, ServerContext, SessionError},
	},
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

type Hook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct LocalTransport {
	server: ServerContext,
	online: AtomicBool,
	/// Answer every write with a 500 while set
	faulty: AtomicBool,
	/// Deliveries left before the link drops; negative means unlimited
	budget: AtomicI64,
	delay: Mutex<Option<Duration>>,
	/// Targets of delivered writes, in delivery order
	delivered: Mutex<Vec<String>>,
	products: Mutex<Value>,
	categories: Mutex<Value>,
	/// Runs once the server has ingested a batch, before the client hears back
	after_ingest: Mutex<Option<Hook>>,
}

impl LocalTransport {
	pub fn new(server: ServerContext) -> Arc<Self> {
		Arc::new(Self {
			server,
			online: AtomicBool::new(true),
			faulty: AtomicBool::new(false),
			budget: AtomicI64::new(-1),
			delay: Mutex::new(None),
			delivered: Mutex::new(Vec::new()),
			products: Mutex::new(json!([])),
			categories: Mutex::new(json!([])),
			after_ingest: Mutex::new(None),
		})
	}

	pub fn go_offline(&self) {
		self.online.store(false, Ordering::SeqCst);
	}

	pub fn go_online(&self) {
		self.budget.store(-1, Ordering::SeqCst);
		self.online.store(true, Ordering::SeqCst);
	}

	pub fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}

	pub fn set_faulty(&self, faulty: bool) {
		self.faulty.store(faulty, Ordering::SeqCst);
	}

	/// Let `count` more writes through, then drop the link
	pub fn drop_after(&self, count: i64) {
		self.budget.store(count, Ordering::SeqCst);
	}

	pub async fn set_delay(&self, delay: Duration) {
		*self.delay.lock().await = Some(delay);
	}

	pub async fn delivered(&self) -> Vec<String> {
		self.delivered.lock().await.clone()
	}

	pub async fn set_catalog(&self, products: Value, categories: Value) {
		*self.products.lock().await = products;
		*self.categories.lock().await = categories;
	}

	pub async fn set_after_ingest<F, Fut>(&self, hook: F)
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		*self.after_ingest.lock().await = Some(Box::new(move || hook().boxed()));
	}

	fn check_link(&self) -> Result<(), TransportError> {
		if self.is_online() {
			Ok(())
		} else {
			Err(TransportError::Unreachable("connection refused".to_string()))
		}
	}

	/// Gate for a write: consumes one unit of the delivery budget
	async fn admit_write(&self) -> Result<(), TransportError> {
		if let Some(delay) = *self.delay.lock().await {
			tokio::time::sleep(delay).await;
		}
		self.check_link()?;

		let remaining = self.budget.load(Ordering::SeqCst);
		if remaining == 0 {
			self.go_offline();
			return Err(TransportError::Unreachable("connection reset".to_string()));
		}
		if remaining > 0 {
			self.budget.fetch_sub(1, Ordering::SeqCst);
		}

		if self.faulty.load(Ordering::SeqCst) {
			return Err(TransportError::ServerFault {
				status: 500,
				message: "Internal Server Error".to_string(),
			});
		}
		Ok(())
	}
}

fn order_error(err: OrderError) -> TransportError {
	match err {
		OrderError::Validation(message) => TransportError::Rejected {
			status: 400,
			message,
		},
		OrderError::NotFound(_) => TransportError::Rejected {
			status: 404,
			message: err.to_string(),
		},
		OrderError::Conflict { ref current } => TransportError::Conflict {
			message: err.to_string(),
			current: serde_json::to_value(current.as_ref()).unwrap_or(Value::Null),
		},
		other => TransportError::ServerFault {
			status: 500,
			message: other.to_string(),
		},
	}
}

fn session_error(err: SessionError) -> TransportError {
	let status = match err {
		SessionError::Validation(_) => 400,
		SessionError::NotFound(_) => 404,
		SessionError::InvalidTransition { .. } => 409,
		_ => 500,
	};
	TransportError::from_response(status, &json!({ "status": "error", "message": err.to_string() }))
}

fn encode<T: serde::Serialize>(value: T) -> Result<Value, TransportError> {
	serde_json::to_value(value).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl SyncTransport for LocalTransport {
	async fn send(&self, mutation: &Mutation, _headers: &Headers) -> Result<Value, TransportError> {
		self.admit_write().await?;

		let orders = self.server.orders();
		let value = match mutation {
			Mutation::CreateOrder { order } => {
				let outcome = orders.create(order.clone().into()).await.map_err(order_error)?;
				encode(outcome.into_order())?
			}
			Mutation::UpdateOrder {
				order_id,
				base_version,
				changes,
			} => {
				let patch = OrderPatch {
					base_version: Some(*base_version),
					changes: changes.clone(),
				};
				encode(orders.update(*order_id, patch).await.map_err(order_error)?)?
			}
			Mutation::ChangeOrderStatus {
				order_id,
				status,
				note,
			} => encode(
				orders
					.update_status(*order_id, *status, note.clone())
					.await
					.map_err(order_error)?,
			)?,
		};

		self.delivered.lock().await.push(mutation.target());
		Ok(value)
	}

	async fn ingest_orders(
		&self,
		batch: &[OfflineOrder],
	) -> Result<Vec<IngestResult>, TransportError> {
		self.admit_write().await?;

		let results = self
			.server
			.ingestor()
			.ingest(batch.to_vec())
			.await
			.map_err(|e| TransportError::Rejected {
				status: 400,
				message: e.to_string(),
			})?;

		self.delivered.lock().await.push("/orders/sync".to_string());
		if let Some(hook) = &*self.after_ingest.lock().await {
			hook().await;
		}
		Ok(results)
	}

	async fn start_session(&self, request: &StartSession) -> Result<SyncSession, TransportError> {
		self.check_link()?;
		self.server
			.sessions()
			.start(request.clone())
			.await
			.map_err(session_error)
	}

	async fn update_progress(
		&self,
		session_id: Uuid,
		update: &ProgressUpdate,
	) -> Result<SyncSession, TransportError> {
		self.check_link()?;
		self.server
			.sessions()
			.update_progress(session_id, update.clone())
			.await
			.map_err(session_error)
	}

	async fn complete_session(
		&self,
		session_id: Uuid,
		request: &CompleteSession,
	) -> Result<SyncSession, TransportError> {
		self.check_link()?;
		self.server
			.sessions()
			.complete(session_id, request.clone())
			.await
			.map_err(session_error)
	}

	async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
		self.check_link()?;
		match path {
			"/products" => Ok(self.products.lock().await.clone()),
			"/categories" => Ok(self.categories.lock().await.clone()),
			other => Err(TransportError::Rejected {
				status: 404,
				message: format!("no route for {}", other),
			}),
		}
	}

	async fn ping(&self) -> Result<(), TransportError> {
		self.check_link()
	}
}
