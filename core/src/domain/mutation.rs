//! Typed write operations captured by the client

use super::order::{OfflineId, OfflineOrder, OrderChanges, OrderPatch, OrderStatus, StatusChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type OperationId = i64;

/// Extra request headers replayed verbatim with a queued operation
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
	Post,
	Put,
	Patch,
	Delete,
}

impl HttpMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Patch => "PATCH",
			HttpMethod::Delete => "DELETE",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s.to_ascii_uppercase().as_str() {
			"POST" => Some(HttpMethod::Post),
			"PUT" => Some(HttpMethod::Put),
			"PATCH" => Some(HttpMethod::Patch),
			"DELETE" => Some(HttpMethod::Delete),
			_ => None,
		}
	}
}

impl fmt::Display for HttpMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
	#[error("offlineId is required")]
	MissingOfflineId,

	#[error("Order must contain at least one item")]
	EmptyOrder,

	#[error("Order update for {0} changes nothing")]
	EmptyChanges(Uuid),
}

/// A mutating call the client wants the server to apply.
///
/// Each variant knows its own target resource and HTTP method, so queued
/// payloads stay typed from capture to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
	CreateOrder {
		order: OfflineOrder,
	},
	UpdateOrder {
		order_id: Uuid,
		base_version: i64,
		changes: OrderChanges,
	},
	ChangeOrderStatus {
		order_id: Uuid,
		status: OrderStatus,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		note: Option<String>,
	},
}

impl Mutation {
	pub fn kind(&self) -> &'static str {
		match self {
			Mutation::CreateOrder { .. } => "create_order",
			Mutation::UpdateOrder { .. } => "update_order",
			Mutation::ChangeOrderStatus { .. } => "change_order_status",
		}
	}

	pub fn method(&self) -> HttpMethod {
		match self {
			Mutation::CreateOrder { .. } => HttpMethod::Post,
			Mutation::UpdateOrder { .. } | Mutation::ChangeOrderStatus { .. } => HttpMethod::Patch,
		}
	}

	/// Server path relative to the API base
	pub fn target(&self) -> String {
		match self {
			Mutation::CreateOrder { .. } => "/orders".to_string(),
			Mutation::UpdateOrder { order_id, .. } => format!("/orders/{}", order_id),
			Mutation::ChangeOrderStatus { order_id, .. } => format!("/orders/{}/status", order_id),
		}
	}

	/// Operations sharing a stream key must be applied in enqueue order.
	/// Creations are keyed by their own offline id since they are independent.
	pub fn stream_key(&self) -> String {
		match self {
			Mutation::CreateOrder { order } => format!("orders/offline/{}", order.offline_id),
			Mutation::UpdateOrder { order_id, .. } | Mutation::ChangeOrderStatus { order_id, .. } => {
				format!("orders/{}", order_id)
			}
		}
	}

	pub fn is_creation(&self) -> bool {
		matches!(self, Mutation::CreateOrder { .. })
	}

	pub fn offline_id(&self) -> Option<&OfflineId> {
		match self {
			Mutation::CreateOrder { order } => Some(&order.offline_id),
			_ => None,
		}
	}

	pub fn as_offline_order(&self) -> Option<&OfflineOrder> {
		match self {
			Mutation::CreateOrder { order } => Some(order),
			_ => None,
		}
	}

	/// Identifier of the entity this mutation touches, as used in conflicts
	pub fn entity_id(&self) -> String {
		match self {
			Mutation::CreateOrder { order } => order.offline_id.to_string(),
			Mutation::UpdateOrder { order_id, .. } | Mutation::ChangeOrderStatus { order_id, .. } => {
				order_id.to_string()
			}
		}
	}

	/// JSON request body sent to the server
	pub fn body(&self) -> Value {
		let body = match self {
			Mutation::CreateOrder { order } => serde_json::to_value(order),
			Mutation::UpdateOrder {
				base_version,
				changes,
				..
			} => serde_json::to_value(OrderPatch {
				base_version: Some(*base_version),
				changes: changes.clone(),
			}),
			Mutation::ChangeOrderStatus { status, note, .. } => serde_json::to_value(StatusChange {
				status: *status,
				note: note.clone(),
			}),
		};

		body.unwrap_or(Value::Null)
	}

	/// Structural checks applied before a mutation may enter the queue
	pub fn validate(&self) -> Result<(), MutationError> {
		match self {
			Mutation::CreateOrder { order } => {
				if order.offline_id.is_blank() {
					return Err(MutationError::MissingOfflineId);
				}
				if order.items.is_empty() {
					return Err(MutationError::EmptyOrder);
				}
				Ok(())
			}
			Mutation::UpdateOrder {
				order_id, changes, ..
			} => {
				if changes.is_empty() {
					return Err(MutationError::EmptyChanges(*order_id));
				}
				Ok(())
			}
			Mutation::ChangeOrderStatus { .. } => Ok(()),
		}
	}
}

/// A queued write awaiting server acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
	pub id: OperationId,
	pub mutation: Mutation,
	pub target: String,
	pub method: HttpMethod,
	pub headers: Headers,
	pub enqueued_at: DateTime<Utc>,
	pub attempt_count: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
	/// Whether the operation exhausted its attempts and needs a human
	pub fn is_stuck(&self, max_attempts: u32) -> bool {
		self.attempt_count >= max_attempts
	}

	pub fn stream_key(&self) -> String {
		self.mutation.stream_key()
	}
}
