//! Sync session entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_sessions")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	#[sea_orm(unique)]
	pub uuid: Uuid,
	pub client_id: String,
	pub store_id: Uuid,
	pub start_time: DateTimeUtc,
	pub end_time: Option<DateTimeUtc>,
	pub status: String,
	pub total_records: i64,
	pub processed_records: i64,
	/// JSON object holding `progressDetails` / `completionDetails`
	#[sea_orm(column_type = "Text")]
	pub metadata: String,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::sync_conflict::Entity")]
	Conflicts,
}

impl Related<super::sync_conflict::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Conflicts.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
