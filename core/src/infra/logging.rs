//! Tracing setup for the client daemon and the CLI

use std::path::Path;

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "pos_sync_core=info,pos_sync=info,pos_sync_server=info";

/// Initialise stdout logging plus a daily rolling file under `logs_dir`.
/// Only the first call in a process has any effect.
pub fn initialize_tracing_with_file_logging(
	logs_dir: &Path,
	level: Option<&str>,
) -> anyhow::Result<()> {
	use std::sync::Once;
	use tracing_appender::rolling::{RollingFileAppender, Rotation};
	use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

	static INIT: Once = Once::new();
	let mut result: anyhow::Result<()> = Ok(());

	INIT.call_once(|| {
		if let Err(e) = std::fs::create_dir_all(logs_dir) {
			result = Err(anyhow::anyhow!("Failed to create logs directory: {}", e));
			return;
		}

		let fallback = filter_for(level);

		let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "pos-sync.log");

		if let Err(e) = tracing_subscriber::registry()
			.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
			.with(fmt::layer().with_target(true).with_writer(std::io::stdout))
			.with(
				fmt::layer()
					.with_target(true)
					.with_ansi(false)
					.with_writer(file_appender),
			)
			.try_init()
		{
			result = Err(anyhow::anyhow!("Failed to initialize tracing: {}", e));
		}
	});

	result
}

/// Initialise stdout-only logging, for one-shot CLI commands
pub fn initialize_tracing(level: Option<&str>) {
	use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

	let fallback = filter_for(level);

	let _ = tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
		.with(fmt::layer().with_target(true).with_writer(std::io::stderr))
		.try_init();
}

fn filter_for(level: Option<&str>) -> String {
	match level {
		Some(level) => format!("pos_sync_core={level},pos_sync={level},pos_sync_server={level}"),
		None => DEFAULT_LOG_FILTER.to_string(),
	}
}
