//! Database access
//!
//! Both sides of the sync engine keep their state in an embedded SQLite
//! database opened through sea-orm. Migrations run on open.

pub mod entities;
pub mod migration;

use migration::{ClientMigrator, ServerMigrator};
use sea_orm::{ConnectOptions, DatabaseConnection, DbErr, SqlErr};
use sea_orm_migration::MigratorTrait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Database(#[from] DbErr),

	#[error("Failed to prepare database directory: {0}")]
	Io(#[from] std::io::Error),
}

/// An open, migrated SQLite database
#[derive(Debug, Clone)]
pub struct Database {
	conn: DatabaseConnection,
	path: PathBuf,
}

impl Database {
	/// Open (or create) the client database and apply client migrations
	pub async fn open_client(path: impl AsRef<Path>) -> Result<Self, DbError> {
		let db = Self::connect(path.as_ref()).await?;
		ClientMigrator::up(&db.conn, None).await?;
		info!(path = %db.path.display(), "Client database ready");
		Ok(db)
	}

	/// Open (or create) the server database and apply server migrations
	pub async fn open_server(path: impl AsRef<Path>) -> Result<Self, DbError> {
		let db = Self::connect(path.as_ref()).await?;
		ServerMigrator::up(&db.conn, None).await?;
		info!(path = %db.path.display(), "Server database ready");
		Ok(db)
	}

	async fn connect(path: &Path) -> Result<Self, DbError> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}

		let url = format!("sqlite://{}?mode=rwc", path.display());
		debug!(%url, "Connecting to database");

		// A single connection serialises writers, which SQLite requires anyway
		let mut options = ConnectOptions::new(url);
		options
			.max_connections(1)
			.min_connections(1)
			.acquire_timeout(Duration::from_secs(30))
			.sqlx_logging(false);

		let conn = sea_orm::Database::connect(options).await?;

		Ok(Self {
			conn,
			path: path.to_path_buf(),
		})
	}

	pub fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn close(self) -> Result<(), DbError> {
		self.conn.close().await?;
		Ok(())
	}
}

/// Whether a failed write hit a unique index
pub fn is_unique_violation(err: &DbErr) -> bool {
	matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
