//! Offline order entity
//!
//! Draft orders captured on the client, keyed by their offline id. A row
//! lives exactly as long as the queued creation that carries it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub offline_id: String,
	pub store_id: Uuid,
	/// Serialized `OfflineOrder`
	#[sea_orm(column_type = "Text")]
	pub payload: String,
	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
