//! Client/server pair sharing one temp directory

use super::sync_transport::LocalTransport;
use pos_sync_core::{
	config::ClientConfig,
	domain::{OrderDraft, OrderItem, Store, Topping, Variation},
	infra::db::Database,
	service::{
		client::{Connectivity, SyncClient, SyncTransport},
		server::ServerContext,
	},
	EventBus,
};
use std::sync::Arc;
use tempfile::TempDir;

pub struct SyncHarness {
	pub server: ServerContext,
	pub store: Store,
	pub transport: Arc<LocalTransport>,
	pub client: SyncClient,
	pub temp_dir: TempDir,
}

impl SyncHarness {
	pub async fn new() -> Self {
		Self::with_config(|_| {}).await
	}

	/// Build a harness, letting the caller adjust the client config first
	pub async fn with_config(adjust: impl FnOnce(&mut ClientConfig)) -> Self {
		let temp_dir = TempDir::new().expect("temp dir");

		let server_db = Database::open_server(temp_dir.path().join("server").join("server.db"))
			.await
			.expect("server database");
		let server = ServerContext::new(server_db.conn().clone(), EventBus::default());
		let store = server
			.stores()
			.register(None, "DT-0042", "Downtown")
			.await
			.expect("store");

		let transport = LocalTransport::new(server.clone());

		let mut config = ClientConfig::default_with_dir(temp_dir.path().join("client"));
		config.client_id = "reg-1".to_string();
		config.store_id = Some(store.id);
		config.sync.refresh_catalog_after_sync = false;
		adjust(&mut config);

		let client = SyncClient::open(config, transport.clone() as Arc<dyn SyncTransport>)
			.await
			.expect("client");
		client.monitor().report(Connectivity::Reachable);

		Self {
			server,
			store,
			transport,
			client,
			temp_dir,
		}
	}

	/// Take the server away and tell the monitor
	pub fn disconnect(&self) {
		self.transport.go_offline();
		self.client.monitor().report(Connectivity::Unreachable);
	}

	pub fn reconnect(&self) {
		self.transport.go_online();
		self.client.monitor().report(Connectivity::Reachable);
	}

	pub fn draft(&self, product: &str) -> OrderDraft {
		draft_for(self.store.id, product)
	}
}

pub fn draft_for(store: uuid::Uuid, product: &str) -> OrderDraft {
	OrderDraft {
		store,
		customer_name: Some("Walk-in".to_string()),
		items: vec![OrderItem {
			product: format!("p-{}", product.to_lowercase()),
			name: product.to_string(),
			quantity: 1,
			base_price: 4.0,
			variations: vec![Variation {
				name: "size".to_string(),
				value: "large".to_string(),
				price_adjustment: 0.5,
			}],
			toppings: vec![Topping {
				name: "cinnamon".to_string(),
				price: 0.0,
			}],
			subtotal: 4.5,
		}],
		tax: 0.45,
		order_type: Default::default(),
		table_number: None,
		special_instructions: None,
	}
}
