//! Database migrations
//!
//! The client and the server each own a separate database, so each has its
//! own migrator and its own migration history table.

use sea_orm_migration::prelude::*;

mod m20250301_000001_create_client_tables;
mod m20250301_000002_create_server_tables;

/// Migrator for the client database (queue, drafts, catalog cache)
pub struct ClientMigrator;

#[async_trait::async_trait]
impl MigratorTrait for ClientMigrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(m20250301_000001_create_client_tables::Migration)]
	}
}

/// Migrator for the server database (stores, orders, sync sessions)
pub struct ServerMigrator;

#[async_trait::async_trait]
impl MigratorTrait for ServerMigrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(m20250301_000002_create_server_tables::Migration)]
	}
}
