//! Order domain types shared by the client queue and the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated idempotency key for an order created while offline.
///
/// Assigned before the first delivery attempt and never changed afterwards, so
/// every replay of the same draft carries the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfflineId(String);

impl OfflineId {
	/// Build an id from the client identity and its local monotonic counter
	pub fn new(client_id: &str, sequence: u64) -> Self {
		Self(format!("{}-{:010}", client_id, sequence))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Display for OfflineId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for OfflineId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for OfflineId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderType {
	#[serde(rename = "dine-in")]
	DineIn,
	#[default]
	#[serde(rename = "takeaway")]
	Takeaway,
	#[serde(rename = "delivery")]
	Delivery,
}

impl OrderType {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderType::DineIn => "dine-in",
			OrderType::Takeaway => "takeaway",
			OrderType::Delivery => "delivery",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			"dine-in" => Some(OrderType::DineIn),
			"takeaway" => Some(OrderType::Takeaway),
			"delivery" => Some(OrderType::Delivery),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	#[default]
	Pending,
	Confirmed,
	Preparing,
	Ready,
	Completed,
	Cancelled,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Preparing => "preparing",
			OrderStatus::Ready => "ready",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			"pending" => Some(OrderStatus::Pending),
			"confirmed" => Some(OrderStatus::Confirmed),
			"preparing" => Some(OrderStatus::Preparing),
			"ready" => Some(OrderStatus::Ready),
			"completed" => Some(OrderStatus::Completed),
			"cancelled" => Some(OrderStatus::Cancelled),
			_ => None,
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
	pub name: String,
	pub value: String,
	#[serde(default)]
	pub price_adjustment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topping {
	pub name: String,
	#[serde(default)]
	pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
	/// Catalog product id
	pub product: String,
	pub name: String,
	pub quantity: i64,
	pub base_price: f64,
	#[serde(default)]
	pub variations: Vec<Variation>,
	#[serde(default)]
	pub toppings: Vec<Topping>,
	pub subtotal: f64,
}

impl OrderItem {
	pub fn is_customized(&self) -> bool {
		!self.variations.is_empty()
	}
}

/// An order as composed at the register, before it has an offline id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
	pub store: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_name: Option<String>,
	pub items: Vec<OrderItem>,
	#[serde(default)]
	pub tax: f64,
	#[serde(default)]
	pub order_type: OrderType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
}

impl OrderDraft {
	pub fn into_offline(self, offline_id: OfflineId, created_at: DateTime<Utc>) -> OfflineOrder {
		OfflineOrder {
			offline_id,
			store: self.store,
			customer_name: self.customer_name,
			items: self.items,
			tax: self.tax,
			order_type: self.order_type,
			table_number: self.table_number,
			special_instructions: self.special_instructions,
			created_at,
		}
	}
}

/// A draft order carrying its idempotency key; the unit of batch ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineOrder {
	pub offline_id: OfflineId,
	pub store: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_name: Option<String>,
	#[serde(default)]
	pub items: Vec<OrderItem>,
	#[serde(default)]
	pub tax: f64,
	#[serde(default)]
	pub order_type: OrderType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// Body of a single order creation. `offline_id` is present when the order
/// was drafted by a client that may replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offline_id: Option<OfflineId>,
	pub store: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_name: Option<String>,
	#[serde(default)]
	pub items: Vec<OrderItem>,
	#[serde(default)]
	pub tax: f64,
	#[serde(default)]
	pub order_type: OrderType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime<Utc>>,
}

impl From<OfflineOrder> for OrderSubmission {
	fn from(order: OfflineOrder) -> Self {
		Self {
			offline_id: Some(order.offline_id),
			store: order.store,
			customer_name: order.customer_name,
			items: order.items,
			tax: order.tax,
			order_type: order.order_type,
			table_number: order.table_number,
			special_instructions: order.special_instructions,
			created_at: Some(order.created_at),
		}
	}
}

/// Editable order fields. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderChanges {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
}

impl OrderChanges {
	pub fn is_empty(&self) -> bool {
		self.customer_name.is_none()
			&& self.table_number.is_none()
			&& self.special_instructions.is_none()
	}
}

/// Body of `PATCH /orders/{id}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base_version: Option<i64>,
	#[serde(flatten)]
	pub changes: OrderChanges,
}

/// Body of `PATCH /orders/{id}/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
	pub status: OrderStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

/// The canonical order committed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	pub id: Uuid,
	pub order_number: String,
	pub store: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offline_id: Option<OfflineId>,
	pub offline_created: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_name: Option<String>,
	pub items: Vec<OrderItem>,
	pub subtotal: f64,
	pub tax: f64,
	pub total: f64,
	pub status: OrderStatus,
	pub order_type: OrderType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special_instructions: Option<String>,
	/// Estimated minutes until the order is ready
	pub preparation_time: i32,
	pub version: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Minutes of kitchen time: a 10 minute base, 3 per customized item and 1 per
/// topping, kept within 10..=45.
pub fn estimate_preparation_time(items: &[OrderItem]) -> i32 {
	let customized = items.iter().filter(|item| item.is_customized()).count() as i32;
	let toppings: i32 = items.iter().map(|item| item.toppings.len() as i32).sum();

	(10 + customized * 3 + toppings).clamp(10, 45)
}

/// Order subtotal as the sum of the item subtotals
pub fn order_subtotal(items: &[OrderItem]) -> f64 {
	items.iter().map(|item| item.subtotal).sum()
}
