use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pos_sync_core::{
	config::ClientConfig,
	domain::{OperationId, OrderDraft, OrderStatus},
	infra::logging,
	service::client::{
		queue::LAST_SYNC_TIME, ConnectivityProbe, DrainOutcome, HttpTransport, SyncClient,
		SyncTransport, TransportProbe,
	},
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "pos-sync", about = "Offline order capture and sync for a POS register")]
struct Cli {
	/// Path to the register data directory
	#[arg(long, env = "POS_SYNC_DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Override the sync server URL from the config
	#[arg(long, env = "POS_SYNC_SERVER_URL")]
	server_url: Option<String>,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Run the sync agent until interrupted
	Run,
	/// Replay the queue once
	Drain,
	/// Queue and connectivity summary
	Status,
	/// List operations that exhausted their attempts
	Stuck,
	/// Reset the attempt counter of a stuck operation
	Retry { operation_id: OperationId },
	/// Drop a queued operation for good
	Discard { operation_id: OperationId },
	/// Place an order from a JSON draft file
	Order { path: PathBuf },
	/// Set the status of a server order
	SetStatus {
		order_id: Uuid,
		#[arg(value_parser = parse_status)]
		status: OrderStatus,
		#[arg(long)]
		note: Option<String>,
	},
	/// Bind this register to a store
	SetStore { store_id: Uuid },
}

fn parse_status(s: &str) -> Result<OrderStatus, String> {
	OrderStatus::from_str(s).ok_or_else(|| format!("unknown order status: {}", s))
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let data_dir = match cli.data_dir {
		Some(dir) => dir,
		None => pos_sync_core::config::default_data_dir()?,
	};
	std::fs::create_dir_all(&data_dir)
		.with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

	let mut config = ClientConfig::load_from(&data_dir)?;
	if let Some(url) = cli.server_url {
		config.server_url = url;
	}

	if matches!(cli.command, Commands::Run) {
		logging::initialize_tracing_with_file_logging(&config.logs_dir(), Some(&config.log_level))?;
	} else {
		logging::initialize_tracing(Some("warn"));
	}

	let transport: Arc<dyn SyncTransport> = Arc::new(
		HttpTransport::new(
			config.server_url.clone(),
			config.request_timeout(),
			config.client_id.clone(),
		)?,
	);

	if let Commands::SetStore { store_id } = cli.command {
		config.store_id = Some(store_id);
		config.save()?;
		return print(&cli.format, &json!({ "storeId": store_id }));
	}

	let client = SyncClient::open(config, transport.clone()).await?;
	let result = execute(&client, transport, cli.command, &cli.format).await;
	client.close().await?;
	result
}

async fn execute(
	client: &SyncClient,
	transport: Arc<dyn SyncTransport>,
	command: Commands,
	format: &OutputFormat,
) -> Result<()> {
	let queue = client.queue();

	match command {
		Commands::Run => {
			client.start(true);
			tokio::signal::ctrl_c().await?;
			client.shutdown().await;
			Ok(())
		}
		Commands::Drain => match client.sync_now().await? {
			DrainOutcome::Drained(report) => print(format, &serde_json::to_value(report)?),
			DrainOutcome::AlreadyDraining => print(format, &json!({ "alreadyDraining": true })),
		},
		Commands::Status => {
			let reachable = TransportProbe::new(transport).probe().await.is_reachable();
			let status = json!({
				"clientId": client.config().client_id,
				"storeId": client.config().store_id,
				"serverUrl": client.config().server_url,
				"reachable": reachable,
				"pending": queue.len().await?,
				"stuck": queue.stuck().await?.len(),
				"lastSyncTime": queue.get_setting(LAST_SYNC_TIME).await?.unwrap_or(Value::Null),
			});
			print(format, &status)
		}
		Commands::Stuck => print(format, &serde_json::to_value(queue.stuck().await?)?),
		Commands::Retry { operation_id } => {
			print(format, &serde_json::to_value(queue.retry(operation_id).await?)?)
		}
		Commands::Discard { operation_id } => {
			print(format, &serde_json::to_value(queue.discard(operation_id).await?)?)
		}
		Commands::Order { path } => {
			let json = std::fs::read_to_string(&path)
				.with_context(|| format!("Failed to read order draft {:?}", path))?;
			let draft: OrderDraft = serde_json::from_str(&json)?;

			probe_once(client, transport).await;
			let outcome = client.interceptor().create_order(draft).await?;
			print(format, &outcome.into_value())
		}
		Commands::SetStatus {
			order_id,
			status,
			note,
		} => {
			probe_once(client, transport).await;
			let outcome = client
				.interceptor()
				.update_order_status(order_id, status, note)
				.await?;
			print(format, &outcome.into_value())
		}
		Commands::SetStore { .. } => Ok(()),
	}
}

/// One-shot commands have no running probe, so sample connectivity once
async fn probe_once(client: &SyncClient, transport: Arc<dyn SyncTransport>) {
	let state = TransportProbe::new(transport).probe().await;
	client.monitor().report(state);
}

fn print(format: &OutputFormat, value: &Value) -> Result<()> {
	match format {
		OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
		OutputFormat::Human => println!("{}", serde_json::to_string_pretty(value)?),
	}
	Ok(())
}
