//! Client side of the sync engine
//!
//! Wires the connectivity monitor, the durable queue, the write interceptor
//! and the replication agent around one transport and one client database.

pub mod agent;
pub mod connectivity;
pub mod http;
pub mod interceptor;
pub mod queue;
pub mod transport;

pub use agent::{
	AgentConfig, AgentError, AgentHandle, AgentState, AgentTrigger, DrainOutcome, DrainReport,
	ReplicationAgent, StuckOperation, Trigger,
};
pub use connectivity::{Connectivity, ConnectivityMonitor, ConnectivityProbe};
pub use http::HttpTransport;
pub use interceptor::{InterceptError, QueuedReceipt, WriteInterceptor, WriteOutcome};
pub use queue::{FailureRecord, MutationQueue, QueueError};
pub use transport::{SyncTransport, TransportError, TransportProbe};

use crate::config::ClientConfig;
use crate::infra::db::{Database, DbError};
use crate::infra::event::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

struct Running {
	agent: AgentHandle,
	probe: Option<JoinHandle<()>>,
	shutdown: broadcast::Sender<()>,
}

/// A fully wired client
pub struct SyncClient {
	config: ClientConfig,
	db: Database,
	events: EventBus,
	queue: Arc<MutationQueue>,
	monitor: Arc<ConnectivityMonitor>,
	transport: Arc<dyn SyncTransport>,
	interceptor: Arc<WriteInterceptor>,
	agent: Arc<ReplicationAgent>,
	running: Mutex<Option<Running>>,
}

impl SyncClient {
	/// Open the client database under the configured data dir
	pub async fn open(
		config: ClientConfig,
		transport: Arc<dyn SyncTransport>,
	) -> Result<Self, DbError> {
		let db = Database::open_client(config.database_path()).await?;
		Ok(Self::with_database(config, db, transport))
	}

	pub fn with_database(
		config: ClientConfig,
		db: Database,
		transport: Arc<dyn SyncTransport>,
	) -> Self {
		let events = EventBus::default();
		let monitor = Arc::new(ConnectivityMonitor::new().with_events(events.clone()));
		let queue = Arc::new(MutationQueue::new(
			db.conn().clone(),
			config.client_id.clone(),
			config.sync.max_attempts,
		));
		let interceptor = Arc::new(WriteInterceptor::new(
			transport.clone(),
			queue.clone(),
			monitor.clone(),
			events.clone(),
		));
		let agent = Arc::new(
			ReplicationAgent::new(
				AgentConfig::from_settings(&config.client_id, config.store_id, &config.sync),
				queue.clone(),
				transport.clone(),
				monitor.clone(),
				events.clone(),
			)
			.with_interceptor(interceptor.clone()),
		);

		Self {
			config,
			db,
			events,
			queue,
			monitor,
			transport,
			interceptor,
			agent,
			running: Mutex::new(None),
		}
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn queue(&self) -> &Arc<MutationQueue> {
		&self.queue
	}

	pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
		&self.monitor
	}

	pub fn interceptor(&self) -> &Arc<WriteInterceptor> {
		&self.interceptor
	}

	pub fn agent(&self) -> &Arc<ReplicationAgent> {
		&self.agent
	}

	/// Start the agent loop and, unless disabled, the connectivity probe
	pub fn start(&self, probe_connectivity: bool) {
		let mut running = self.running.lock();
		if running.is_some() {
			return;
		}

		let (shutdown, _) = broadcast::channel(1);
		let probe = probe_connectivity.then(|| {
			self.monitor.spawn_probe(
				Arc::new(TransportProbe::new(self.transport.clone())),
				self.config.sync.probe_interval(),
				shutdown.subscribe(),
			)
		});
		let agent = self.agent.clone().spawn();

		info!(client_id = %self.config.client_id, "Sync client started");
		*running = Some(Running {
			agent,
			probe,
			shutdown,
		});
	}

	/// Drain now, through the running agent when there is one
	pub async fn sync_now(&self) -> Result<DrainOutcome, AgentError> {
		let trigger = self.running.lock().as_ref().map(|r| r.agent.trigger());
		match trigger {
			Some(trigger) => trigger.drain().await,
			None => Ok(self.agent.drain(Trigger::Manual).await?),
		}
	}

	pub async fn shutdown(&self) {
		let running = self.running.lock().take();
		if let Some(running) = running {
			let _ = running.shutdown.send(());
			if let Some(probe) = running.probe {
				let _ = probe.await;
			}
			running.agent.shutdown().await;
			info!("Sync client stopped");
		}
	}

	pub async fn close(self) -> Result<(), DbError> {
		self.shutdown().await;
		self.db.close().await
	}
}
