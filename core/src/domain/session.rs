//! Sync session model
//!
//! A session records one replay pass of a client against the server: how many
//! records it meant to deliver, how many were processed, and any conflicts
//! observed along the way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Started,
	InProgress,
	Completed,
	Failed,
}

impl SyncStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncStatus::Started => "started",
			SyncStatus::InProgress => "in_progress",
			SyncStatus::Completed => "completed",
			SyncStatus::Failed => "failed",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			"started" => Some(SyncStatus::Started),
			"in_progress" => Some(SyncStatus::InProgress),
			"completed" => Some(SyncStatus::Completed),
			"failed" => Some(SyncStatus::Failed),
			_ => None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, SyncStatus::Completed | SyncStatus::Failed)
	}

	pub fn is_active(&self) -> bool {
		!self.is_terminal()
	}
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
	Server,
	Client,
	Manual,
}

impl ResolvedBy {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResolvedBy::Server => "server",
			ResolvedBy::Client => "client",
			ResolvedBy::Manual => "manual",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			"server" => Some(ResolvedBy::Server),
			"client" => Some(ResolvedBy::Client),
			"manual" => Some(ResolvedBy::Manual),
			_ => None,
		}
	}
}

/// A divergence between the client's view of an entity and the server's.
/// Conflicts are appended to a session and never edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
	pub entity_type: String,
	pub entity_id: String,
	#[serde(default)]
	pub local_version: Value,
	#[serde(default)]
	pub server_version: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resolved_by: Option<ResolvedBy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
	pub session_id: Uuid,
	pub client_id: String,
	pub store_id: Uuid,
	pub start_time: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_time: Option<DateTime<Utc>>,
	pub status: SyncStatus,
	pub total_records: u64,
	pub processed_records: u64,
	pub progress_percentage: u8,
	#[serde(default)]
	pub conflicts: Vec<ConflictRecord>,
	#[serde(default)]
	pub metadata: Value,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Rounded completion percentage, 0 for an empty session
pub fn progress_percentage(total: u64, processed: u64) -> u8 {
	if total == 0 {
		return 0;
	}
	let ratio = processed.min(total) as f64 / total as f64;
	(ratio * 100.0).round() as u8
}

/// Body of `POST /sync/start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
	pub client: String,
	pub store: Uuid,
	#[serde(default)]
	pub total_records: u64,
	#[serde(default)]
	pub metadata: Value,
}

/// Body of `PATCH /sync/{sessionId}/progress`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
	pub processed_records: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<SyncStatus>,
	#[serde(default)]
	pub metadata: Value,
}

/// Body of `POST /sync/{sessionId}/complete`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSession {
	#[serde(default)]
	pub metadata: Value,
	#[serde(default)]
	pub conflicts: Vec<ConflictRecord>,
}

/// Body of `POST /sync/resolve-conflicts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflicts {
	pub session_id: Uuid,
	pub conflicts: Vec<ConflictRecord>,
}

pub const DEFAULT_HISTORY_LIMIT: u64 = 50;

fn default_history_limit() -> u64 {
	DEFAULT_HISTORY_LIMIT
}

/// Filters for `GET /sync/history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
	#[serde(default)]
	pub store: Option<Uuid>,
	#[serde(default)]
	pub client: Option<String>,
	#[serde(default)]
	pub status: Option<SyncStatus>,
	#[serde(default)]
	pub start_date: Option<DateTime<Utc>>,
	#[serde(default)]
	pub end_date: Option<DateTime<Utc>>,
	#[serde(default = "default_history_limit")]
	pub limit: u64,
	#[serde(default)]
	pub skip: u64,
}

impl Default for HistoryQuery {
	fn default() -> Self {
		Self {
			store: None,
			client: None,
			status: None,
			start_date: None,
			end_date: None,
			limit: DEFAULT_HISTORY_LIMIT,
			skip: 0,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
	pub sessions: Vec<SyncSession>,
	pub total: u64,
	pub limit: u64,
	pub skip: u64,
}
