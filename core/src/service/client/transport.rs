//! Transport seam between the client and the sync server
//!
//! The replication agent and the write interceptor only talk to the server
//! through [`SyncTransport`]. The production implementation is
//! [`super::http::HttpTransport`]; tests plug in an in-process one.

use super::connectivity::{Connectivity, ConnectivityProbe};
use crate::domain::{
	CompleteSession, Headers, IngestResult, Mutation, OfflineOrder, ProgressUpdate, StartSession,
	SyncSession,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// How a failed server call should be treated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
	/// No response at all: connection refused, DNS failure, timeout
	#[error("Server unreachable: {0}")]
	Unreachable(String),

	/// The server rejected the request (4xx other than 409)
	#[error("Request rejected ({status}): {message}")]
	Rejected { status: u16, message: String },

	/// The write was based on a stale version of the entity
	#[error("Conflict: {message}")]
	Conflict { message: String, current: Value },

	/// The server failed while handling the request (5xx)
	#[error("Server error ({status}): {message}")]
	ServerFault { status: u16, message: String },

	/// A success response whose body could not be understood
	#[error("Malformed response: {0}")]
	Decode(String),
}

impl TransportError {
	/// Classify a non-success response by status and the error envelope
	pub fn from_response(status: u16, body: &Value) -> Self {
		let message = body
			.get("message")
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| format!("HTTP {}", status));

		match status {
			409 => TransportError::Conflict {
				message,
				current: body.get("data").cloned().unwrap_or(Value::Null),
			},
			400..=499 => TransportError::Rejected { status, message },
			_ => TransportError::ServerFault { status, message },
		}
	}

	pub fn is_unreachable(&self) -> bool {
		matches!(self, TransportError::Unreachable(_))
	}

	/// Failures worth retrying later: the request may succeed unchanged
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			TransportError::Unreachable(_) | TransportError::ServerFault { .. }
		)
	}
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
	/// Deliver one mutation to its target resource
	async fn send(&self, mutation: &Mutation, headers: &Headers) -> Result<Value, TransportError>;

	/// Submit a batch of offline orders; results come back in batch order
	async fn ingest_orders(
		&self,
		orders: &[OfflineOrder],
	) -> Result<Vec<IngestResult>, TransportError>;

	async fn start_session(&self, request: &StartSession) -> Result<SyncSession, TransportError>;

	async fn update_progress(
		&self,
		session_id: Uuid,
		update: &ProgressUpdate,
	) -> Result<SyncSession, TransportError>;

	async fn complete_session(
		&self,
		session_id: Uuid,
		request: &CompleteSession,
	) -> Result<SyncSession, TransportError>;

	/// Read a resource. Reads are never queued.
	async fn fetch(&self, path: &str) -> Result<Value, TransportError>;

	/// Cheap liveness check
	async fn ping(&self) -> Result<(), TransportError>;
}

/// Probes connectivity by pinging through a transport. Any answer from the
/// server, even an error status, counts as reachable.
pub struct TransportProbe {
	transport: Arc<dyn SyncTransport>,
}

impl TransportProbe {
	pub fn new(transport: Arc<dyn SyncTransport>) -> Self {
		Self { transport }
	}
}

#[async_trait]
impl ConnectivityProbe for TransportProbe {
	async fn probe(&self) -> Connectivity {
		match self.transport.ping().await {
			Err(TransportError::Unreachable(_)) => Connectivity::Unreachable,
			_ => Connectivity::Reachable,
		}
	}
}
