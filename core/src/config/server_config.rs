//! Sync server configuration

use super::{default_data_dir, Migrate};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const CONFIG_FILE: &str = "server.json";

/// A store registered on startup if it does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSeed {
	#[serde(default)]
	pub id: Option<Uuid>,
	pub code: String,
	pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Address the HTTP API listens on
	pub bind_address: String,

	/// Database file, relative to `data_dir` unless absolute
	pub database_file: PathBuf,

	/// Logging level
	pub log_level: String,

	#[serde(default)]
	pub stores: Vec<StoreSeed>,
}

impl ServerConfig {
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: ServerConfig = serde_json::from_str(&json)?;

			if config.needs_migration() {
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

	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		Self::load_from(data_dir).or_else(|e| {
			warn!("Failed to load config ({}), writing defaults", e);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			bind_address: "0.0.0.0:8080".to_string(),
			database_file: PathBuf::from("server.db"),
			log_level: "info".to_string(),
			stores: Vec::new(),
		}
	}

	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	pub fn database_path(&self) -> PathBuf {
		if self.database_file.is_absolute() {
			self.database_file.clone()
		} else {
			self.data_dir.join(&self.database_file)
		}
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}
}

impl Migrate for ServerConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		1
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}
