//! Client daemon configuration

use super::{default_data_dir, Migrate};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const CONFIG_FILE: &str = "client.json";

/// Register-side configuration, stored as `client.json` in the data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Identity of this register; prefixes every offline id it generates
	pub client_id: String,

	/// Store this register belongs to. Sync sessions are skipped when unset.
	#[serde(default)]
	pub store_id: Option<Uuid>,

	/// Base URL of the sync server API
	pub server_url: String,

	/// Per-request timeout for server calls
	pub request_timeout_secs: u64,

	/// Logging level
	pub log_level: String,

	#[serde(default)]
	pub sync: SyncSettings,
}

/// Replication agent tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
	/// Periodic drain interval while the server is reachable
	pub auto_sync_interval_secs: u64,

	/// Drain as soon as connectivity is restored
	pub sync_on_connection: bool,

	/// Attempts after which a queued operation is reported as stuck
	pub max_attempts: u32,

	/// How often the connectivity probe pings the server
	pub probe_interval_secs: u64,

	/// Refetch products/categories after a pass that delivered something
	pub refresh_catalog_after_sync: bool,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			auto_sync_interval_secs: 5 * 60,
			sync_on_connection: true,
			max_attempts: 5,
			probe_interval_secs: 15,
			refresh_catalog_after_sync: true,
		}
	}
}

impl SyncSettings {
	pub fn auto_sync_interval(&self) -> Duration {
		Duration::from_secs(self.auto_sync_interval_secs.max(1))
	}

	pub fn probe_interval(&self) -> Duration {
		Duration::from_secs(self.probe_interval_secs.max(1))
	}
}

impl ClientConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory, creating a default
	/// one when none exists yet
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: ClientConfig = serde_json::from_str(&json)?;

			if config.needs_migration() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Load or create configuration, replacing an unreadable file
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		Self::load_from(data_dir).or_else(|e| {
			warn!("Failed to load config ({}), writing defaults", e);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		let suffix = Uuid::new_v4().simple().to_string();
		Self {
			version: Self::target_version(),
			data_dir,
			client_id: format!("pos-{}", &suffix[..8]),
			store_id: None,
			server_url: "http://localhost:8080".to_string(),
			request_timeout_secs: 10,
			log_level: "info".to_string(),
			sync: SyncSettings::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join("client.db")
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs.max(1))
	}
}

impl Migrate for ClientConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		2 // v2 bounds retries with sync.max_attempts
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 | 1 => {
				if self.sync.max_attempts == 0 {
					self.sync.max_attempts = SyncSettings::default().max_attempts;
				}
				self.version = 2;
				Ok(())
			}
			2 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn creates_default_config_on_first_load() {
		let temp = TempDir::new().unwrap();
		let config = ClientConfig::load_from(temp.path()).unwrap();

		assert!(temp.path().join(CONFIG_FILE).exists());
		assert_eq!(config.version, ClientConfig::target_version());
		assert_eq!(config.sync.auto_sync_interval_secs, 300);
		assert!(config.sync.sync_on_connection);
		assert!(config.client_id.starts_with("pos-"));

		// Reloading keeps the generated identity
		let again = ClientConfig::load_from(temp.path()).unwrap();
		assert_eq!(again.client_id, config.client_id);
	}

	#[test]
	fn migrates_v1_files() {
		let temp = TempDir::new().unwrap();
		let v1 = serde_json::json!({
			"version": 1,
			"data_dir": temp.path(),
			"client_id": "register-7",
			"server_url": "http://pos.local",
			"request_timeout_secs": 10,
			"log_level": "debug",
			"sync": { "auto_sync_interval_secs": 60, "max_attempts": 0 }
		});
		fs::write(temp.path().join(CONFIG_FILE), v1.to_string()).unwrap();

		let config = ClientConfig::load_from(temp.path()).unwrap();
		assert_eq!(config.version, 2);
		assert_eq!(config.sync.max_attempts, 5);
		assert_eq!(config.sync.auto_sync_interval_secs, 60);
		assert_eq!(config.client_id, "register-7");
	}
}
