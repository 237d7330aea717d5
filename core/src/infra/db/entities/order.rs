//! Order entity
//!
//! Canonical server-side orders. `offline_id` carries a unique index so at
//! most one order is ever committed per client draft.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	#[sea_orm(unique)]
	pub uuid: Uuid,
	#[sea_orm(unique)]
	pub order_number: String,
	pub store_id: Uuid,
	#[sea_orm(unique)]
	pub offline_id: Option<String>,
	pub offline_created: bool,
	pub customer_name: Option<String>,
	/// Serialized `Vec<OrderItem>`
	#[sea_orm(column_type = "Text")]
	pub items: String,
	pub subtotal: f64,
	pub tax: f64,
	pub total: f64,
	pub status: String,
	pub order_type: String,
	pub table_number: Option<String>,
	#[sea_orm(column_type = "Text", nullable)]
	pub special_instructions: Option<String>,
	pub preparation_time: i32,
	pub version: i64,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
