//! Pending request entity
//!
//! Client-side queue of writes that still need server acknowledgment. The
//! autoincrement id is the replay order.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_requests")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i64,
	/// Mutation variant, e.g. "create_order"
	pub kind: String,
	pub target: String,
	pub method: String,
	pub stream_key: String,
	/// Serialized `Mutation`
	#[sea_orm(column_type = "Text")]
	pub payload: String,
	/// Serialized header map
	#[sea_orm(column_type = "Text")]
	pub headers: String,
	pub offline_id: Option<String>,
	pub enqueued_at: DateTimeUtc,
	pub attempt_count: i32,
	#[sea_orm(column_type = "Text", nullable)]
	pub last_error: Option<String>,
	pub last_attempt_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
