//! Store registry

use super::ServerContext;
use crate::domain::Store;
use crate::infra::db::entities::store;
use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
	TransactionTrait,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] DbErr),

	#[error("Validation error: {0}")]
	Validation(String),
}

pub struct StoreRegistry {
	ctx: ServerContext,
}

impl StoreRegistry {
	pub fn new(ctx: ServerContext) -> Self {
		Self { ctx }
	}

	/// Register a store, returning the existing one if the code is taken
	pub async fn register(
		&self,
		id: Option<Uuid>,
		code: &str,
		name: &str,
	) -> Result<Store, StoreError> {
		let code = code.trim();
		if code.is_empty() {
			return Err(StoreError::Validation("store code is required".to_string()));
		}

		let txn = self.ctx.db().begin().await?;

		if let Some(existing) = store::Entity::find()
			.filter(store::Column::Code.eq(code))
			.one(&txn)
			.await?
		{
			return Ok(existing.to_domain());
		}

		let model = store::ActiveModel {
			uuid: Set(id.unwrap_or_else(Uuid::new_v4)),
			code: Set(code.to_string()),
			name: Set(name.to_string()),
			created_at: Set(Utc::now()),
			..Default::default()
		}
		.insert(&txn)
		.await?;

		txn.commit().await?;

		info!(store_id = %model.uuid, code, "Registered store");
		Ok(model.to_domain())
	}

	pub async fn get(&self, id: Uuid) -> Result<Option<Store>, StoreError> {
		Ok(store::Entity::find()
			.filter(store::Column::Uuid.eq(id))
			.one(self.ctx.db())
			.await?
			.map(|model| model.to_domain()))
	}

	pub async fn list(&self) -> Result<Vec<Store>, StoreError> {
		Ok(store::Entity::find()
			.order_by_asc(store::Column::Code)
			.all(self.ctx.db())
			.await?
			.iter()
			.map(store::Model::to_domain)
			.collect())
	}
}
