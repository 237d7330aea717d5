//! Configuration for the client daemon and the sync server

use anyhow::{anyhow, Result};
use std::fs;
use std::path::PathBuf;

pub mod client_config;
pub mod migration;
pub mod server_config;

pub use client_config::{ClientConfig, SyncSettings};
pub use migration::Migrate;
pub use server_config::{ServerConfig, StoreSeed};

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("PosSync");

	#[cfg(not(target_os = "windows"))]
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("pos-sync");

	fs::create_dir_all(&dir)?;

	Ok(dir)
}
