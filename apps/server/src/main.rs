use anyhow::{Context, Result};
use clap::Parser;
use pos_sync_core::{config::ServerConfig, infra::logging, Database, EventBus, ServerContext};
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

mod error;
mod routes;

#[derive(Parser, Debug)]
#[command(name = "pos-sync-server", about = "Back-office endpoint for POS order sync")]
struct Args {
	/// Path to the server data directory
	#[arg(long, env = "DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Port to listen on, overriding the configured bind address
	#[arg(long, env = "PORT")]
	port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let data_dir = match args.data_dir {
		Some(dir) => dir,
		None => pos_sync_core::config::default_data_dir()?,
	};
	std::fs::create_dir_all(&data_dir)
		.with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

	let config = ServerConfig::load_or_create(&data_dir)?;
	logging::initialize_tracing_with_file_logging(&config.logs_dir(), Some(&config.log_level))?;

	let db = Database::open_server(config.database_path()).await?;
	let ctx = ServerContext::new(db.conn().clone(), EventBus::default());

	for seed in &config.stores {
		ctx.stores()
			.register(seed.id, &seed.code, &seed.name)
			.await
			.with_context(|| format!("Failed to register store {}", seed.code))?;
	}

	let mut addr: SocketAddr = config
		.bind_address
		.parse()
		.with_context(|| format!("Invalid bind address {}", config.bind_address))?;
	if let Some(port) = args.port {
		addr.set_port(port);
	}

	let app = routes::router(ctx)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive());

	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!("Listening on http://{}", addr);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("HTTP server failed")?;

	db.close().await?;
	info!("Server stopped");
	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for shutdown signal");
	}
	info!("Shutdown signal received");
}
