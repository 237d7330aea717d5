//! Per-item outcome of batch ingestion

use super::order::{OfflineId, OfflineOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
	Success,
	Skipped,
	Error,
}

impl IngestStatus {
	/// The server holds the entity, so the client may forget its copy
	pub fn is_acknowledged(&self) -> bool {
		matches!(self, IngestStatus::Success | IngestStatus::Skipped)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
	pub offline_id: OfflineId,
	pub status: IngestStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub entity_id: Option<Uuid>,
}

impl IngestResult {
	pub fn success(offline_id: OfflineId, entity_id: Uuid) -> Self {
		Self {
			offline_id,
			status: IngestStatus::Success,
			message: None,
			entity_id: Some(entity_id),
		}
	}

	pub fn skipped(offline_id: OfflineId, entity_id: Uuid) -> Self {
		Self {
			offline_id,
			status: IngestStatus::Skipped,
			message: Some("already exists".to_string()),
			entity_id: Some(entity_id),
		}
	}

	pub fn error(offline_id: OfflineId, message: impl Into<String>) -> Self {
		Self {
			offline_id,
			status: IngestStatus::Error,
			message: Some(message.into()),
			entity_id: None,
		}
	}
}

/// Body of `POST /orders/sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
	pub orders: Vec<OfflineOrder>,
}
