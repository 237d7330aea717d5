//! Config schema migration

use anyhow::Result;

/// Implemented by versioned config files that upgrade themselves on load
pub trait Migrate {
	fn current_version(&self) -> u32;

	fn target_version() -> u32;

	/// Upgrade in place to `target_version`
	fn migrate(&mut self) -> Result<()>;

	fn needs_migration(&self) -> bool {
		self.current_version() < Self::target_version()
	}
}
