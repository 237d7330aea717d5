//! Background replication agent
//!
//! Drains the mutation queue once the server is reachable again. A pass
//! takes an ordered snapshot of the queue, submits every queued order
//! creation as one batch to the ingestion endpoint, then replays the
//! remaining writes per resource stream. Items are only removed after the
//! server acknowledged them.
//!
//! A stream stops at its first failed delivery. An operation that reached
//! the attempt bound is a barrier: later operations of its stream are held
//! back until it is retried or discarded.
//!
//! Triggers are connectivity restored, a periodic timer and manual requests.
//! Only one pass runs at a time; triggers arriving mid-pass are dropped.

use super::connectivity::{Connectivity, ConnectivityMonitor};
use super::interceptor::WriteInterceptor;
use super::queue::{MutationQueue, QueueError, LAST_SYNC_TIME};
use super::transport::{SyncTransport, TransportError};
use crate::config::SyncSettings;
use crate::domain::{
	CompleteSession, ConflictRecord, OperationId, PendingOperation, ProgressUpdate, StartSession,
	SyncSession, SyncStatus,
};
use crate::infra::event::{Event, EventBus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AgentError {
	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),

	#[error("Replication agent is not running")]
	Stopped,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
	pub client_id: String,
	/// Store used for session bookkeeping; sessions are skipped without one
	pub store_id: Option<Uuid>,
	pub auto_sync_interval: Duration,
	pub sync_on_connection: bool,
	pub refresh_catalog_after_sync: bool,
}

impl AgentConfig {
	pub fn from_settings(client_id: &str, store_id: Option<Uuid>, settings: &SyncSettings) -> Self {
		Self {
			client_id: client_id.to_string(),
			store_id,
			auto_sync_interval: settings.auto_sync_interval(),
			sync_on_connection: settings.sync_on_connection,
			refresh_catalog_after_sync: settings.refresh_catalog_after_sync,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
	Idle,
	Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
	ConnectivityRestored,
	Timer,
	Manual,
}

/// A queued operation that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckOperation {
	pub operation_id: OperationId,
	pub kind: String,
	pub target: String,
	pub attempts: u32,
	pub last_error: Option<String>,
}

impl From<&PendingOperation> for StuckOperation {
	fn from(op: &PendingOperation) -> Self {
		Self {
			operation_id: op.id,
			kind: op.mutation.kind().to_string(),
			target: op.target.clone(),
			attempts: op.attempt_count,
			last_error: op.last_error.clone(),
		}
	}
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
	/// Items the server acknowledged (created, already present, or applied)
	pub synced: usize,
	/// Failed attempts recorded during this pass
	pub errors: usize,
	pub conflicts: Vec<ConflictRecord>,
	/// Items excluded from replay because they reached the attempt bound
	pub stuck: Vec<StuckOperation>,
	/// Items held back behind a stuck operation of the same stream
	#[serde(default)]
	pub blocked: Vec<OperationId>,
	pub session_id: Option<Uuid>,
	pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
	/// Another pass was running; this trigger was dropped
	AlreadyDraining,
	Drained(DrainReport),
}

impl DrainOutcome {
	pub fn report(&self) -> Option<&DrainReport> {
		match self {
			DrainOutcome::Drained(report) => Some(report),
			DrainOutcome::AlreadyDraining => None,
		}
	}
}

/// Per-pass bookkeeping shared by the batch and replay phases
#[derive(Debug, Default)]
struct Ledger {
	orders_processed: usize,
	requests_processed: usize,
	errors: usize,
	transport_failures: usize,
	conflicts: Vec<ConflictRecord>,
	newly_stuck: Vec<StuckOperation>,
	blocked: Vec<OperationId>,
}

impl Ledger {
	fn synced(&self) -> usize {
		self.orders_processed + self.requests_processed
	}

	fn processed(&self) -> usize {
		self.synced() + self.conflicts.len()
	}

	fn merge(&mut self, other: Ledger) {
		self.orders_processed += other.orders_processed;
		self.requests_processed += other.requests_processed;
		self.errors += other.errors;
		self.transport_failures += other.transport_failures;
		self.conflicts.extend(other.conflicts);
		self.newly_stuck.extend(other.newly_stuck);
		self.blocked.extend(other.blocked);
	}
}

/// Resets the single-flight flag when a pass ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

enum AgentCommand {
	Drain {
		reply: oneshot::Sender<Result<DrainOutcome, QueueError>>,
	},
}

pub struct ReplicationAgent {
	config: AgentConfig,
	queue: Arc<MutationQueue>,
	transport: Arc<dyn SyncTransport>,
	monitor: Arc<ConnectivityMonitor>,
	events: EventBus,
	/// Used to refresh the catalog after a productive pass
	interceptor: Option<Arc<WriteInterceptor>>,
	draining: AtomicBool,
}

impl ReplicationAgent {
	pub fn new(
		config: AgentConfig,
		queue: Arc<MutationQueue>,
		transport: Arc<dyn SyncTransport>,
		monitor: Arc<ConnectivityMonitor>,
		events: EventBus,
	) -> Self {
		Self {
			config,
			queue,
			transport,
			monitor,
			events,
			interceptor: None,
			draining: AtomicBool::new(false),
		}
	}

	pub fn with_interceptor(mut self, interceptor: Arc<WriteInterceptor>) -> Self {
		self.interceptor = Some(interceptor);
		self
	}

	pub fn state(&self) -> AgentState {
		if self.draining.load(Ordering::SeqCst) {
			AgentState::Draining
		} else {
			AgentState::Idle
		}
	}

	/// Run one drain pass unless one is already in progress
	pub async fn drain(&self, trigger: Trigger) -> Result<DrainOutcome, QueueError> {
		if self
			.draining
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			debug!(?trigger, "Drain already in progress, ignoring trigger");
			return Ok(DrainOutcome::AlreadyDraining);
		}
		let _guard = DrainGuard(&self.draining);

		self.drain_pass(trigger).await.map(DrainOutcome::Drained)
	}

	async fn drain_pass(&self, trigger: Trigger) -> Result<DrainReport, QueueError> {
		let started = Instant::now();
		let (replayable, stuck, blocked) = self.plan(self.queue.snapshot().await?);

		let mut report = DrainReport {
			stuck: stuck.iter().map(StuckOperation::from).collect(),
			blocked,
			..Default::default()
		};

		if replayable.is_empty() {
			debug!(
				?trigger,
				stuck = report.stuck.len(),
				blocked = report.blocked.len(),
				"Nothing to replay"
			);
			return Ok(report);
		}

		info!(
			?trigger,
			pending = replayable.len(),
			stuck = report.stuck.len(),
			blocked = report.blocked.len(),
			"Starting drain pass"
		);
		self.events.emit(Event::DrainStarted {
			pending: replayable.len(),
		});

		let session = self.start_session(replayable.len()).await;

		let mut ledger = Ledger::default();
		let replayed = self.replay(session.as_ref(), replayable, &mut ledger).await;
		let duration = started.elapsed();

		if let Some(session) = &session {
			let failure = replayed.as_ref().err().map(|e| e.to_string());
			self.finish_session(session, &ledger, duration, failure).await;
		}

		for stuck in &ledger.newly_stuck {
			self.events.emit(Event::OperationStuck {
				operation_id: stuck.operation_id,
				kind: stuck.kind.clone(),
				attempts: stuck.attempts,
				last_error: stuck.last_error.clone(),
			});
		}

		report.synced = ledger.synced();
		report.errors = ledger.errors;
		report.stuck.extend(ledger.newly_stuck);
		report.blocked.extend(ledger.blocked);
		report.conflicts = ledger.conflicts;
		report.session_id = session.map(|s| s.session_id);
		report.duration_ms = duration.as_millis() as u64;

		self.events.emit(Event::DrainFinished {
			synced: report.synced,
			errors: report.errors,
			stuck: report.stuck.len(),
			conflicts: report.conflicts.len(),
		});

		if let Err(e) = replayed {
			error!(
				synced = report.synced,
				error = %e,
				"Drain pass aborted on a local queue failure"
			);
			return Err(e);
		}

		info!(
			synced = report.synced,
			errors = report.errors,
			stuck = report.stuck.len(),
			blocked = report.blocked.len(),
			conflicts = report.conflicts.len(),
			duration_ms = report.duration_ms,
			"Drain pass finished"
		);

		if report.synced > 0 && self.config.refresh_catalog_after_sync {
			if let Some(interceptor) = &self.interceptor {
				if let Err(e) = interceptor.refresh_catalog().await {
					warn!(error = %e, "Catalog refresh after sync failed");
				}
			}
		}

		Ok(report)
	}

	/// Split an ordered snapshot into what this pass replays, what is stuck,
	/// and what waits behind a stuck operation of its stream
	fn plan(
		&self,
		snapshot: Vec<PendingOperation>,
	) -> (Vec<PendingOperation>, Vec<PendingOperation>, Vec<OperationId>) {
		let max_attempts = self.queue.max_attempts();
		let mut barriers = HashSet::new();
		let mut replayable = Vec::new();
		let mut stuck = Vec::new();
		let mut blocked = Vec::new();

		for op in snapshot {
			let key = op.stream_key();
			if op.is_stuck(max_attempts) {
				barriers.insert(key);
				stuck.push(op);
			} else if barriers.contains(&key) {
				blocked.push(op.id);
			} else {
				replayable.push(op);
			}
		}

		(replayable, stuck, blocked)
	}

	/// Batch then per-stream phases. Progress lands in `ledger` as it is made,
	/// so a queue failure midway still leaves an accurate account.
	async fn replay(
		&self,
		session: Option<&SyncSession>,
		replayable: Vec<PendingOperation>,
		ledger: &mut Ledger,
	) -> Result<(), QueueError> {
		let (creations, writes): (Vec<_>, Vec<_>) = replayable
			.into_iter()
			.partition(|op| op.mutation.is_creation());

		if !creations.is_empty() {
			self.ingest_creations(&creations, ledger).await?;
			self.report_progress(session, ledger, "orders").await;
		}

		if !writes.is_empty() {
			self.replay_streams(writes, ledger).await?;
			self.report_progress(session, ledger, "requests").await;
		}

		if ledger.synced() > 0 {
			let now = chrono::Utc::now().to_rfc3339();
			self.queue.put_setting(LAST_SYNC_TIME, &json!(now)).await?;
		}

		Ok(())
	}

	/// Submit all queued creations as one batch and settle each item by its
	/// positional result
	async fn ingest_creations(
		&self,
		creations: &[PendingOperation],
		ledger: &mut Ledger,
	) -> Result<(), QueueError> {
		let orders: Vec<_> = creations
			.iter()
			.filter_map(|op| op.mutation.as_offline_order().cloned())
			.collect();

		let results = match self.transport.ingest_orders(&orders).await {
			Ok(results) => results,
			Err(err) => {
				warn!(error = %err, batch = creations.len(), "Order batch could not be delivered");
				self.note_transport_failure(&err, ledger);
				for op in creations {
					self.fail_operation(op, &err.to_string(), ledger).await?;
				}
				return Ok(());
			}
		};

		for (index, op) in creations.iter().enumerate() {
			let result = results.get(index).filter(|result| {
				op.mutation
					.offline_id()
					.is_some_and(|id| *id == result.offline_id)
			});

			match result {
				Some(result) if result.status.is_acknowledged() => {
					self.queue.remove(op.id).await?;
					ledger.orders_processed += 1;
					debug!(
						operation_id = op.id,
						offline_id = %result.offline_id,
						status = ?result.status,
						"Order acknowledged"
					);
				}
				Some(result) => {
					let message = result.message.clone().unwrap_or_else(|| "rejected".to_string());
					warn!(
						operation_id = op.id,
						offline_id = %result.offline_id,
						%message,
						"Order rejected by server"
					);
					self.fail_operation(op, &message, ledger).await?;
				}
				None => {
					self.fail_operation(op, "no matching result in batch response", ledger)
						.await?;
				}
			}
		}

		Ok(())
	}

	/// Replay non-creation writes. Streams run concurrently; each stream
	/// stays in enqueue order and stops at its first failed delivery.
	async fn replay_streams(
		&self,
		writes: Vec<PendingOperation>,
		ledger: &mut Ledger,
	) -> Result<(), QueueError> {
		let mut streams: Vec<Vec<PendingOperation>> = Vec::new();
		let mut index: HashMap<String, usize> = HashMap::new();

		for op in writes {
			let key = op.stream_key();
			match index.get(&key) {
				Some(&i) => streams[i].push(op),
				None => {
					index.insert(key, streams.len());
					streams.push(vec![op]);
				}
			}
		}

		// Every stream settles before the first queue error is returned
		let settled = join_all(streams.into_iter().map(|ops| async move {
			let mut stream = Ledger::default();
			let result = self.replay_stream(ops, &mut stream).await;
			(stream, result)
		}))
		.await;

		let mut first_error = None;
		for (stream, result) in settled {
			ledger.merge(stream);
			if let Err(e) = result {
				first_error.get_or_insert(e);
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	async fn replay_stream(
		&self,
		ops: Vec<PendingOperation>,
		ledger: &mut Ledger,
	) -> Result<(), QueueError> {
		let mut ops = ops.into_iter();

		while let Some(op) = ops.next() {
			let failure = match self.transport.send(&op.mutation, &op.headers).await {
				Ok(_) => {
					self.queue.remove(op.id).await?;
					ledger.requests_processed += 1;
					None
				}
				Err(TransportError::Conflict { message, current }) => {
					info!(
						operation_id = op.id,
						entity_id = %op.mutation.entity_id(),
						%message,
						"Write conflicts with server version, recording conflict"
					);
					ledger.conflicts.push(ConflictRecord {
						entity_type: "order".to_string(),
						entity_id: op.mutation.entity_id(),
						local_version: op.mutation.body(),
						server_version: current,
						resolved_by: None,
					});
					self.queue.remove(op.id).await?;
					None
				}
				Err(err) => {
					if err.is_transient() {
						self.note_transport_failure(&err, ledger);
					}
					Some(err)
				}
			};

			let Some(err) = failure else {
				continue;
			};

			warn!(
				operation_id = op.id,
				stream = %op.stream_key(),
				error = %err,
				"Stopping replay stream after failed delivery"
			);
			if self.fail_operation(&op, &err.to_string(), ledger).await? {
				ledger.blocked.extend(ops.by_ref().map(|held| held.id));
			}
			break;
		}

		Ok(())
	}

	/// Record a failed attempt; returns whether the operation is now stuck
	async fn fail_operation(
		&self,
		op: &PendingOperation,
		message: &str,
		ledger: &mut Ledger,
	) -> Result<bool, QueueError> {
		let record = self.queue.record_failure(op.id, message).await?;
		ledger.errors += 1;
		if record.became_stuck {
			ledger.newly_stuck.push(StuckOperation::from(&record.operation));
		}
		Ok(record.became_stuck)
	}

	fn note_transport_failure(&self, err: &TransportError, ledger: &mut Ledger) {
		ledger.transport_failures += 1;
		if err.is_unreachable() {
			self.monitor.report(Connectivity::Unreachable);
		}
	}

	// Session bookkeeping is best effort: failures are logged, never fatal

	async fn start_session(&self, total: usize) -> Option<SyncSession> {
		let store = self.config.store_id?;
		let request = StartSession {
			client: self.config.client_id.clone(),
			store,
			total_records: total as u64,
			metadata: json!({ "source": "replication_agent" }),
		};

		match self.transport.start_session(&request).await {
			Ok(session) => {
				debug!(session_id = %session.session_id, total, "Sync session started");
				Some(session)
			}
			Err(e) => {
				warn!(error = %e, "Failed to start sync session, continuing without one");
				None
			}
		}
	}

	async fn report_progress(&self, session: Option<&SyncSession>, ledger: &Ledger, phase: &str) {
		let Some(session) = session else {
			return;
		};

		let update = ProgressUpdate {
			processed_records: ledger.processed() as u64,
			status: Some(SyncStatus::InProgress),
			metadata: json!({
				"phase": phase,
				"ordersProcessed": ledger.orders_processed,
				"requestsProcessed": ledger.requests_processed,
				"errorCount": ledger.errors,
			}),
		};

		if let Err(e) = self.transport.update_progress(session.session_id, &update).await {
			warn!(session_id = %session.session_id, error = %e, "Failed to report sync progress");
		}
	}

	async fn finish_session(
		&self,
		session: &SyncSession,
		ledger: &Ledger,
		duration: Duration,
		failure: Option<String>,
	) {
		let summary = json!({
			"ordersProcessed": ledger.orders_processed,
			"requestsProcessed": ledger.requests_processed,
			"errorCount": ledger.errors,
			"durationMs": duration.as_millis() as u64,
		});

		// Nothing got through because the server went away: record a failure
		let failure = failure.or_else(|| {
			(ledger.processed() == 0 && ledger.transport_failures > 0)
				.then(|| "server unreachable".to_string())
		});

		let result = if let Some(reason) = failure {
			let update = ProgressUpdate {
				processed_records: ledger.processed() as u64,
				status: Some(SyncStatus::Failed),
				metadata: json!({ "reason": reason, "summary": summary }),
			};
			self.transport
				.update_progress(session.session_id, &update)
				.await
		} else {
			let request = CompleteSession {
				metadata: summary,
				conflicts: ledger.conflicts.clone(),
			};
			self.transport
				.complete_session(session.session_id, &request)
				.await
		};

		match result {
			Ok(session) => debug!(
				session_id = %session.session_id,
				status = %session.status,
				"Sync session closed"
			),
			Err(e) => warn!(session_id = %session.session_id, error = %e, "Failed to close sync session"),
		}
	}

	/// Spawn the agent loop. Returns a handle for manual triggers and shutdown.
	pub fn spawn(self: Arc<Self>) -> AgentHandle {
		let (commands, command_rx) = mpsc::channel(16);
		let (shutdown, shutdown_rx) = broadcast::channel(1);

		let task = tokio::spawn(self.run(command_rx, shutdown_rx));

		AgentHandle {
			trigger: AgentTrigger { commands },
			shutdown,
			task,
		}
	}

	async fn run(
		self: Arc<Self>,
		mut commands: mpsc::Receiver<AgentCommand>,
		mut shutdown: broadcast::Receiver<()>,
	) {
		info!(
			client_id = %self.config.client_id,
			interval_secs = self.config.auto_sync_interval.as_secs(),
			"Replication agent started"
		);

		let mut connectivity = self.monitor.subscribe();
		let mut ticker = tokio::time::interval(self.config.auto_sync_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// The first tick completes immediately
		ticker.tick().await;

		loop {
			tokio::select! {
				changed = connectivity.changed() => {
					if changed.is_err() {
						break;
					}
					let state = *connectivity.borrow_and_update();
					if state.is_reachable() && self.config.sync_on_connection {
						self.spawn_drain(Trigger::ConnectivityRestored);
					}
				}
				_ = ticker.tick() => {
					if self.monitor.is_reachable() {
						self.spawn_drain(Trigger::Timer);
					}
				}
				command = commands.recv() => match command {
					Some(AgentCommand::Drain { reply }) => {
						let agent = Arc::clone(&self);
						tokio::spawn(async move {
							let outcome = agent.drain(Trigger::Manual).await;
							let _ = reply.send(outcome);
						});
					}
					None => break,
				},
				_ = shutdown.recv() => {
					info!("Replication agent shutdown signal received");
					break;
				}
			}
		}

		info!("Replication agent stopped");
	}

	/// Drain in the background when there is something to replay. Runs
	/// detached so the loop keeps observing triggers, which the single-flight
	/// flag then drops.
	fn spawn_drain(self: &Arc<Self>, trigger: Trigger) {
		let agent = Arc::clone(self);
		tokio::spawn(async move {
			match agent.queue.pending_count().await {
				Ok(0) => debug!(?trigger, "Queue empty, skipping drain"),
				Ok(_) => {
					if let Err(e) = agent.drain(trigger).await {
						error!(?trigger, error = %e, "Drain pass failed");
					}
				}
				Err(e) => error!(error = %e, "Failed to inspect queue"),
			}
		});
	}
}

/// Cloneable sender for manual drain requests
#[derive(Clone)]
pub struct AgentTrigger {
	commands: mpsc::Sender<AgentCommand>,
}

impl AgentTrigger {
	/// Ask the agent to drain now and wait for the outcome
	pub async fn drain(&self) -> Result<DrainOutcome, AgentError> {
		let (reply, rx) = oneshot::channel();
		self.commands
			.send(AgentCommand::Drain { reply })
			.await
			.map_err(|_| AgentError::Stopped)?;

		Ok(rx.await.map_err(|_| AgentError::Stopped)??)
	}
}

/// Control handle for a running agent
pub struct AgentHandle {
	trigger: AgentTrigger,
	shutdown: broadcast::Sender<()>,
	task: JoinHandle<()>,
}

impl AgentHandle {
	pub fn trigger(&self) -> AgentTrigger {
		self.trigger.clone()
	}

	pub fn is_running(&self) -> bool {
		!self.task.is_finished()
	}

	/// Stop the loop and wait for it. A pass already in flight finishes on
	/// its own task.
	pub async fn shutdown(self) {
		let _ = self.shutdown.send(());
		if let Err(e) = self.task.await {
			error!(error = %e, "Replication agent task panicked");
		}
	}
}
