//! Conflict records attached to a sync session (append-only)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_conflicts")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub session_id: i32,
	pub entity_type: String,
	pub entity_id: String,
	#[sea_orm(column_type = "Text")]
	pub local_version: String,
	#[sea_orm(column_type = "Text")]
	pub server_version: String,
	pub resolved_by: Option<String>,
	pub recorded_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::sync_session::Entity",
		from = "Column::SessionId",
		to = "super::sync_session::Column::Id",
		on_delete = "Cascade"
	)]
	Session,
}

impl Related<super::sync_session::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Session.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
