//! Server side of the sync engine

pub mod ingest;
pub mod orders;
pub mod session;
pub mod stores;

pub use ingest::{IngestError, OrderIngestor};
pub use orders::{CreateOutcome, OrderError, OrderService};
pub use session::{SessionError, SessionOrchestrator};
pub use stores::{StoreError, StoreRegistry};

use crate::infra::event::EventBus;
use sea_orm::DatabaseConnection;

/// Shared handles for the server services. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServerContext {
	db: DatabaseConnection,
	events: EventBus,
}

impl ServerContext {
	pub fn new(db: DatabaseConnection, events: EventBus) -> Self {
		Self { db, events }
	}

	pub fn db(&self) -> &DatabaseConnection {
		&self.db
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn stores(&self) -> StoreRegistry {
		StoreRegistry::new(self.clone())
	}

	pub fn orders(&self) -> OrderService {
		OrderService::new(self.clone())
	}

	pub fn ingestor(&self) -> OrderIngestor {
		OrderIngestor::new(self.clone())
	}

	pub fn sessions(&self) -> SessionOrchestrator {
		SessionOrchestrator::new(self.clone())
	}
}
