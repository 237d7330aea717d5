//! Client key/value settings (last sync time, offline id counter)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settings")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub key: String,
	/// JSON encoded value
	#[sea_orm(column_type = "Text")]
	pub value: String,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
