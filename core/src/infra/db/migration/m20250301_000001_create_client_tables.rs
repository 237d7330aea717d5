//! Create the client-side tables
//!
//! - pending_requests: durable queue of writes awaiting acknowledgment
//! - orders: offline order drafts keyed by offline id
//! - products / categories: read-through catalog cache
//! - settings: key/value store

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(PendingRequests::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(PendingRequests::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(PendingRequests::Kind).string().not_null())
					.col(ColumnDef::new(PendingRequests::Target).string().not_null())
					.col(ColumnDef::new(PendingRequests::Method).string().not_null())
					.col(ColumnDef::new(PendingRequests::StreamKey).string().not_null())
					.col(ColumnDef::new(PendingRequests::Payload).text().not_null())
					.col(ColumnDef::new(PendingRequests::Headers).text().not_null())
					.col(ColumnDef::new(PendingRequests::OfflineId).string())
					.col(
						ColumnDef::new(PendingRequests::EnqueuedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(PendingRequests::AttemptCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(PendingRequests::LastError).text())
					.col(ColumnDef::new(PendingRequests::LastAttemptAt).timestamp_with_time_zone())
					.to_owned(),
			)
			.await?;

		// Stuck lookups filter on attempts
		manager
			.create_index(
				Index::create()
					.name("idx_pending_requests_attempts")
					.table(PendingRequests::Table)
					.col(PendingRequests::AttemptCount)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Orders::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Orders::OfflineId)
							.string()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Orders::StoreId).uuid().not_null())
					.col(ColumnDef::new(Orders::Payload).text().not_null())
					.col(
						ColumnDef::new(Orders::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		for table in [CacheTable::Products, CacheTable::Categories] {
			manager
				.create_table(
					Table::create()
						.table(table)
						.if_not_exists()
						.col(
							ColumnDef::new(CacheColumn::Id)
								.string()
								.not_null()
								.primary_key(),
						)
						.col(ColumnDef::new(CacheColumn::Data).text().not_null())
						.col(
							ColumnDef::new(CacheColumn::CachedAt)
								.timestamp_with_time_zone()
								.not_null(),
						)
						.to_owned(),
				)
				.await?;
		}

		manager
			.create_table(
				Table::create()
					.table(Settings::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Settings::Key)
							.string()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Settings::Value).text().not_null())
					.col(
						ColumnDef::new(Settings::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Settings::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(CacheTable::Categories).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(CacheTable::Products).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Orders::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(PendingRequests::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum PendingRequests {
	Table,
	Id,
	Kind,
	Target,
	Method,
	StreamKey,
	Payload,
	Headers,
	OfflineId,
	EnqueuedAt,
	AttemptCount,
	LastError,
	LastAttemptAt,
}

#[derive(DeriveIden)]
enum Orders {
	Table,
	OfflineId,
	StoreId,
	Payload,
	CreatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum CacheTable {
	Products,
	Categories,
}

#[derive(DeriveIden)]
enum CacheColumn {
	Id,
	Data,
	CachedAt,
}

#[derive(DeriveIden)]
enum Settings {
	Table,
	Key,
	Value,
	UpdatedAt,
}
