//! Create the server-side tables
//!
//! - stores: reference targets for sessions and orders
//! - orders: canonical orders, unique on offline_id
//! - sync_sessions / sync_conflicts: replay bookkeeping

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Stores::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Stores::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Stores::Uuid).uuid().not_null().unique_key())
					.col(ColumnDef::new(Stores::Code).string().not_null().unique_key())
					.col(ColumnDef::new(Stores::Name).string().not_null())
					.col(
						ColumnDef::new(Stores::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Orders::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Orders::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Orders::Uuid).uuid().not_null().unique_key())
					.col(
						ColumnDef::new(Orders::OrderNumber)
							.string()
							.not_null()
							.unique_key(),
					)
					.col(ColumnDef::new(Orders::StoreId).uuid().not_null())
					.col(ColumnDef::new(Orders::OfflineId).string())
					.col(
						ColumnDef::new(Orders::OfflineCreated)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(ColumnDef::new(Orders::CustomerName).string())
					.col(ColumnDef::new(Orders::Items).text().not_null())
					.col(ColumnDef::new(Orders::Subtotal).double().not_null())
					.col(ColumnDef::new(Orders::Tax).double().not_null().default(0.0))
					.col(ColumnDef::new(Orders::Total).double().not_null())
					.col(ColumnDef::new(Orders::Status).string().not_null())
					.col(ColumnDef::new(Orders::OrderType).string().not_null())
					.col(ColumnDef::new(Orders::TableNumber).string())
					.col(ColumnDef::new(Orders::SpecialInstructions).text())
					.col(ColumnDef::new(Orders::PreparationTime).integer().not_null())
					.col(
						ColumnDef::new(Orders::Version)
							.big_integer()
							.not_null()
							.default(1),
					)
					.col(
						ColumnDef::new(Orders::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(Orders::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		// One committed order per offline draft. SQLite treats NULLs as
		// distinct, so orders created online are unaffected.
		manager
			.create_index(
				Index::create()
					.name("idx_orders_offline_id")
					.table(Orders::Table)
					.col(Orders::OfflineId)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_orders_store")
					.table(Orders::Table)
					.col(Orders::StoreId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(SyncSessions::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(SyncSessions::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(SyncSessions::Uuid)
							.uuid()
							.not_null()
							.unique_key(),
					)
					.col(ColumnDef::new(SyncSessions::ClientId).string().not_null())
					.col(ColumnDef::new(SyncSessions::StoreId).uuid().not_null())
					.col(
						ColumnDef::new(SyncSessions::StartTime)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(ColumnDef::new(SyncSessions::EndTime).timestamp_with_time_zone())
					.col(ColumnDef::new(SyncSessions::Status).string().not_null())
					.col(
						ColumnDef::new(SyncSessions::TotalRecords)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(SyncSessions::ProcessedRecords)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(SyncSessions::Metadata).text().not_null())
					.col(
						ColumnDef::new(SyncSessions::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(SyncSessions::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		// History queries filter by store/client and sort by creation time
		manager
			.create_index(
				Index::create()
					.name("idx_sync_sessions_store_created")
					.table(SyncSessions::Table)
					.col(SyncSessions::StoreId)
					.col(SyncSessions::CreatedAt)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_sync_sessions_client_created")
					.table(SyncSessions::Table)
					.col(SyncSessions::ClientId)
					.col(SyncSessions::CreatedAt)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(SyncConflicts::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(SyncConflicts::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(SyncConflicts::SessionId).integer().not_null())
					.col(ColumnDef::new(SyncConflicts::EntityType).string().not_null())
					.col(ColumnDef::new(SyncConflicts::EntityId).string().not_null())
					.col(ColumnDef::new(SyncConflicts::LocalVersion).text().not_null())
					.col(ColumnDef::new(SyncConflicts::ServerVersion).text().not_null())
					.col(ColumnDef::new(SyncConflicts::ResolvedBy).string())
					.col(
						ColumnDef::new(SyncConflicts::RecordedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_sync_conflicts_session")
							.from(SyncConflicts::Table, SyncConflicts::SessionId)
							.to(SyncSessions::Table, SyncSessions::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_sync_conflicts_session")
					.table(SyncConflicts::Table)
					.col(SyncConflicts::SessionId)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(SyncConflicts::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(SyncSessions::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Orders::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Stores::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum Stores {
	Table,
	Id,
	Uuid,
	Code,
	Name,
	CreatedAt,
}

#[derive(DeriveIden)]
enum Orders {
	Table,
	Id,
	Uuid,
	OrderNumber,
	StoreId,
	OfflineId,
	OfflineCreated,
	CustomerName,
	Items,
	Subtotal,
	Tax,
	Total,
	Status,
	OrderType,
	TableNumber,
	SpecialInstructions,
	PreparationTime,
	Version,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncSessions {
	Table,
	Id,
	Uuid,
	ClientId,
	StoreId,
	StartTime,
	EndTime,
	Status,
	TotalRecords,
	ProcessedRecords,
	Metadata,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncConflicts {
	Table,
	Id,
	SessionId,
	EntityType,
	EntityId,
	LocalVersion,
	ServerVersion,
	ResolvedBy,
	RecordedAt,
}
