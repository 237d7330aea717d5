//! Event bus for decoupled communication
//!
//! Replaces a process-global broker channel: the bus is constructed at
//! startup and handed to the client and server services that publish on it.

use crate::domain::{OrderStatus, SyncSession, SyncStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
	// Client events
	ConnectivityChanged {
		reachable: bool,
	},
	OperationQueued {
		operation_id: i64,
		kind: String,
	},
	DrainStarted {
		pending: usize,
	},
	DrainFinished {
		synced: usize,
		errors: usize,
		stuck: usize,
		conflicts: usize,
	},
	OperationStuck {
		operation_id: i64,
		kind: String,
		attempts: u32,
		last_error: Option<String>,
	},

	// Server events
	SyncStarted {
		session: SyncSession,
	},
	SyncProgress {
		session_id: Uuid,
		status: SyncStatus,
		processed_records: u64,
		total_records: u64,
	},
	SyncCompleted {
		session: SyncSession,
	},
	SyncFailed {
		session_id: Uuid,
		reason: String,
	},
	ConflictsResolved {
		session_id: Uuid,
		count: usize,
	},
	OrderCreatedFromOffline {
		order_id: Uuid,
		offline_id: String,
		store_id: Uuid,
	},
	OrderStatusChanged {
		order_id: Uuid,
		status: OrderStatus,
		previous: OrderStatus,
	},
}

impl Event {
	/// Topic name under which the event is published
	pub fn routing_key(&self) -> &'static str {
		match self {
			Event::ConnectivityChanged { .. } => "client.connectivity_changed",
			Event::OperationQueued { .. } => "client.operation_queued",
			Event::DrainStarted { .. } => "client.drain_started",
			Event::DrainFinished { .. } => "client.drain_finished",
			Event::OperationStuck { .. } => "client.operation_stuck",
			Event::SyncStarted { .. } => "sync.started",
			Event::SyncProgress { .. } => "sync.progress",
			Event::SyncCompleted { .. } => "sync.completed",
			Event::SyncFailed { .. } => "sync.failed",
			Event::ConflictsResolved { .. } => "sync.conflicts_resolved",
			Event::OrderCreatedFromOffline { .. } => "order.created_from_offline",
			Event::OrderStatusChanged { .. } => "order.status_changed",
		}
	}
}

/// Broadcast bus shared by every component of one process
#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<Event>,
}

impl EventBus {
	/// Create a new event bus with specified capacity
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Emit an event, returning how many subscribers received it.
	/// Publishing with nobody listening is not an error.
	pub fn emit(&self, event: Event) -> usize {
		let key = event.routing_key();
		match self.sender.send(event) {
			Ok(count) => {
				debug!(routing_key = key, subscribers = count, "Event emitted");
				count
			}
			Err(_) => 0,
		}
	}

	pub fn subscribe(&self) -> EventSubscriber {
		EventSubscriber {
			receiver: self.sender.subscribe(),
		}
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

pub struct EventSubscriber {
	receiver: broadcast::Receiver<Event>,
}

impl EventSubscriber {
	/// Receive the next event
	pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
		self.receiver.recv().await
	}

	/// Try to receive an event without blocking
	pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
		self.receiver.try_recv()
	}

	/// Wait for the next event matching `filter`
	pub async fn recv_filtered<F>(&mut self, filter: F) -> Result<Event, broadcast::error::RecvError>
	where
		F: Fn(&Event) -> bool,
	{
		loop {
			let event = self.recv().await?;
			if filter(&event) {
				return Ok(event);
			}
		}
	}
}
