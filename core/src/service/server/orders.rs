//! Order writes
//!
//! Creation is deduplicated by offline id: the lookup and the insert share
//! one transaction, and the unique index on `offline_id` turns a lost race
//! into an "already exists" outcome instead of a second order.

use super::ServerContext;
use crate::domain::order::{estimate_preparation_time, order_subtotal};
use crate::domain::{
	OfflineId, Order, OrderItem, OrderPatch, OrderStatus, OrderSubmission, OrderType, Store,
};
use crate::infra::db::entities::{order, store};
use crate::infra::db::is_unique_violation;
use crate::infra::event::Event;
use chrono::{DateTime, Utc};
use sea_orm::{
	ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
	QueryFilter, Set, TransactionTrait,
};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrderError {
	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Order {0} not found")]
	NotFound(Uuid),

	#[error("Order {} has changed on the server (now at version {})", .current.id, .current.version)]
	Conflict { current: Box<Order> },

	#[error("Corrupt order record: {0}")]
	Corrupt(String),

	#[error("Database error: {0}")]
	Database(#[from] DbErr),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrderError>;

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
	Created(Order),
	/// An order with the same offline id was already committed
	Existing(Order),
}

impl CreateOutcome {
	pub fn order(&self) -> &Order {
		match self {
			CreateOutcome::Created(order) | CreateOutcome::Existing(order) => order,
		}
	}

	pub fn into_order(self) -> Order {
		match self {
			CreateOutcome::Created(order) | CreateOutcome::Existing(order) => order,
		}
	}
}

pub struct OrderService {
	ctx: ServerContext,
}

impl OrderService {
	pub fn new(ctx: ServerContext) -> Self {
		Self { ctx }
	}

	/// Create an order, or return the one already committed for its
	/// offline id
	pub async fn create(&self, submission: OrderSubmission) -> Result<CreateOutcome> {
		if submission
			.offline_id
			.as_ref()
			.is_some_and(OfflineId::is_blank)
		{
			return Err(OrderError::Validation("offlineId is required".to_string()));
		}

		let txn = self.ctx.db().begin().await?;

		if let Some(offline_id) = &submission.offline_id {
			if let Some(existing) = find_by_offline_id(&txn, offline_id).await? {
				debug!(%offline_id, order_id = %existing.uuid, "Order already exists");
				return Ok(CreateOutcome::Existing(to_domain(existing)?));
			}
		}

		let store = store::Entity::find()
			.filter(store::Column::Uuid.eq(submission.store))
			.one(&txn)
			.await?
			.ok_or_else(|| {
				OrderError::Validation(format!("Store {} does not exist", submission.store))
			})?
			.to_domain();

		validate_items(&submission.items)?;

		let now = Utc::now();
		let subtotal = order_subtotal(&submission.items);
		let order_number = allocate_order_number(&txn, &store, now).await?;

		let active = order::ActiveModel {
			uuid: Set(Uuid::new_v4()),
			order_number: Set(order_number),
			store_id: Set(store.id),
			offline_id: Set(submission.offline_id.as_ref().map(|id| id.to_string())),
			offline_created: Set(submission.offline_id.is_some()),
			customer_name: Set(submission.customer_name.clone()),
			items: Set(serde_json::to_string(&submission.items)?),
			subtotal: Set(subtotal),
			tax: Set(submission.tax),
			total: Set(subtotal + submission.tax),
			status: Set(OrderStatus::Pending.as_str().to_string()),
			order_type: Set(submission.order_type.as_str().to_string()),
			table_number: Set(submission.table_number.clone()),
			special_instructions: Set(submission.special_instructions.clone()),
			preparation_time: Set(estimate_preparation_time(&submission.items)),
			version: Set(1),
			created_at: Set(now),
			updated_at: Set(now),
			..Default::default()
		};

		let model = match active.insert(&txn).await {
			Ok(model) => model,
			Err(err) if is_unique_violation(&err) => {
				txn.rollback().await?;
				// Another writer committed the same offline id first
				if let Some(offline_id) = &submission.offline_id {
					if let Some(existing) = find_by_offline_id(self.ctx.db(), offline_id).await? {
						debug!(%offline_id, "Lost insert race, order already exists");
						return Ok(CreateOutcome::Existing(to_domain(existing)?));
					}
				}
				return Err(err.into());
			}
			Err(err) => return Err(err.into()),
		};

		txn.commit().await?;

		let order = to_domain(model)?;
		info!(
			order_id = %order.id,
			order_number = %order.order_number,
			offline_id = ?order.offline_id.as_ref().map(OfflineId::as_str),
			"Order created"
		);

		Ok(CreateOutcome::Created(order))
	}

	/// Set the status. The write is absolute, so replaying it is harmless.
	pub async fn update_status(
		&self,
		id: Uuid,
		status: OrderStatus,
		note: Option<String>,
	) -> Result<Order> {
		let txn = self.ctx.db().begin().await?;

		let model = find_by_uuid(&txn, id).await?.ok_or(OrderError::NotFound(id))?;
		let previous = parse_status(&model.status)?;
		let version = model.version;

		let mut active: order::ActiveModel = model.into();
		active.status = Set(status.as_str().to_string());
		active.version = Set(version + 1);
		active.updated_at = Set(Utc::now());
		let model = active.update(&txn).await?;

		txn.commit().await?;

		info!(order_id = %id, %previous, %status, note = ?note, "Order status updated");
		self.ctx.events().emit(Event::OrderStatusChanged {
			order_id: id,
			status,
			previous,
		});

		to_domain(model)
	}

	/// Patch editable fields. A `base_version` that no longer matches the
	/// stored version is a conflict and nothing is written.
	pub async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order> {
		if patch.changes.is_empty() {
			return Err(OrderError::Validation("No changes supplied".to_string()));
		}

		let txn = self.ctx.db().begin().await?;

		let model = find_by_uuid(&txn, id).await?.ok_or(OrderError::NotFound(id))?;
		if let Some(base) = patch.base_version {
			if base != model.version {
				let current = to_domain(model)?;
				debug!(order_id = %id, base, current = current.version, "Stale order update");
				return Err(OrderError::Conflict {
					current: Box::new(current),
				});
			}
		}

		let version = model.version;
		let mut active: order::ActiveModel = model.into();
		let changes = patch.changes;
		if let Some(name) = changes.customer_name {
			active.customer_name = Set(Some(name));
		}
		if let Some(table) = changes.table_number {
			active.table_number = Set(Some(table));
		}
		if let Some(instructions) = changes.special_instructions {
			active.special_instructions = Set(Some(instructions));
		}
		active.version = Set(version + 1);
		active.updated_at = Set(Utc::now());
		let model = active.update(&txn).await?;

		txn.commit().await?;

		info!(order_id = %id, version = version + 1, "Order updated");
		to_domain(model)
	}

	pub async fn get(&self, id: Uuid) -> Result<Order> {
		let model = find_by_uuid(self.ctx.db(), id)
			.await?
			.ok_or(OrderError::NotFound(id))?;
		to_domain(model)
	}

	pub async fn find_by_offline_id(&self, offline_id: &OfflineId) -> Result<Option<Order>> {
		find_by_offline_id(self.ctx.db(), offline_id)
			.await?
			.map(to_domain)
			.transpose()
	}

	/// Number of committed orders carrying this offline id (0 or 1)
	pub async fn count_by_offline_id(&self, offline_id: &OfflineId) -> Result<u64> {
		Ok(order::Entity::find()
			.filter(order::Column::OfflineId.eq(offline_id.as_str()))
			.count(self.ctx.db())
			.await?)
	}

	pub async fn count(&self) -> Result<u64> {
		Ok(order::Entity::find().count(self.ctx.db()).await?)
	}
}

/// Structural checks; business rules beyond these are out of scope
fn validate_items(items: &[OrderItem]) -> Result<()> {
	if items.is_empty() {
		return Err(OrderError::Validation(
			"Order must contain at least one item".to_string(),
		));
	}

	for (index, item) in items.iter().enumerate() {
		let position = index + 1;
		if item.name.trim().is_empty() {
			return Err(OrderError::Validation(format!(
				"Item {} is missing a name",
				position
			)));
		}
		if item.quantity < 1 {
			return Err(OrderError::Validation(format!(
				"Item {} quantity must be at least 1",
				position
			)));
		}
		if !(item.base_price >= 0.0) {
			return Err(OrderError::Validation(format!(
				"Item {} base price must not be negative",
				position
			)));
		}
		if !(item.subtotal >= 0.0) {
			return Err(OrderError::Validation(format!(
				"Item {} subtotal must not be negative",
				position
			)));
		}
	}

	Ok(())
}

/// `<last 4 of store code>-<6 digit timestamp suffix>`, with a numeric
/// suffix appended when that number is already taken
async fn allocate_order_number<C: ConnectionTrait>(
	conn: &C,
	store: &Store,
	now: DateTime<Utc>,
) -> Result<String> {
	let base = format!(
		"{}-{:06}",
		store.order_prefix(),
		now.timestamp_millis().rem_euclid(1_000_000)
	);

	let mut candidate = base.clone();
	let mut attempt = 1;
	while order::Entity::find()
		.filter(order::Column::OrderNumber.eq(candidate.as_str()))
		.count(conn)
		.await? > 0
	{
		attempt += 1;
		candidate = format!("{}-{}", base, attempt);
	}

	Ok(candidate)
}

async fn find_by_uuid<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Option<order::Model>> {
	Ok(order::Entity::find()
		.filter(order::Column::Uuid.eq(id))
		.one(conn)
		.await?)
}

async fn find_by_offline_id<C: ConnectionTrait>(
	conn: &C,
	offline_id: &OfflineId,
) -> Result<Option<order::Model>> {
	Ok(order::Entity::find()
		.filter(order::Column::OfflineId.eq(offline_id.as_str()))
		.one(conn)
		.await?)
}

fn parse_status(value: &str) -> Result<OrderStatus> {
	OrderStatus::from_str(value).ok_or_else(|| OrderError::Corrupt(format!("unknown status {}", value)))
}

fn to_domain(model: order::Model) -> Result<Order> {
	let status = parse_status(&model.status)?;
	let order_type = OrderType::from_str(&model.order_type)
		.ok_or_else(|| OrderError::Corrupt(format!("unknown order type {}", model.order_type)))?;

	Ok(Order {
		id: model.uuid,
		order_number: model.order_number,
		store: model.store_id,
		offline_id: model.offline_id.map(OfflineId::from),
		offline_created: model.offline_created,
		customer_name: model.customer_name,
		items: serde_json::from_str(&model.items)?,
		subtotal: model.subtotal,
		tax: model.tax,
		total: model.total,
		status,
		order_type,
		table_number: model.table_number,
		special_instructions: model.special_instructions,
		preparation_time: model.preparation_time,
		version: model.version,
		created_at: model.created_at,
		updated_at: model.updated_at,
	})
}
