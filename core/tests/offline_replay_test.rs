//! Offline capture and replay, end to end
//!
//! Each test drives a real client (queue, interceptor, agent) against the
//! real server services through an in-process transport that can be cut.

mod helpers;

use helpers::*;
use pos_sync_core::{
	domain::{
		IngestStatus, Mutation, OfflineId, OrderChanges, OrderStatus, SyncStatus, HistoryQuery,
	},
	service::client::{queue::LAST_SYNC_TIME, DrainOutcome, DrainReport, Trigger, WriteOutcome},
	Database, Event,
};
use sea_orm::ConnectionTrait;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

fn drained(outcome: DrainOutcome) -> DrainReport {
	match outcome {
		DrainOutcome::Drained(report) => report,
		DrainOutcome::AlreadyDraining => panic!("expected a drain pass to run"),
	}
}

/// Place an order while online and return its server id and version
async fn place_online(harness: &SyncHarness, product: &str) -> (Uuid, i64) {
	let outcome = harness
		.client
		.interceptor()
		.create_order(harness.draft(product))
		.await
		.unwrap();
	let WriteOutcome::Delivered(order) = outcome else {
		panic!("expected direct delivery");
	};
	let id = order["id"].as_str().unwrap().parse().unwrap();
	(id, order["version"].as_i64().unwrap())
}

#[tokio::test]
async fn three_offline_orders_drain_in_one_pass() {
	let harness = SyncHarness::new().await;
	harness.disconnect();

	let mut offline_ids = Vec::new();
	for product in ["Americano", "Mocha", "Chai"] {
		let outcome = harness
			.client
			.interceptor()
			.create_order(harness.draft(product))
			.await
			.unwrap();
		let WriteOutcome::Queued(receipt) = outcome else {
			panic!("expected the order to be queued");
		};
		offline_ids.push(OfflineId::from(receipt.offline_id.unwrap()));
	}
	assert_eq!(harness.client.queue().len().await.unwrap(), 3);
	assert_eq!(harness.client.queue().offline_orders().await.unwrap().len(), 3);
	assert_eq!(harness.client.queue().get_setting(LAST_SYNC_TIME).await.unwrap(), None);

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 3);
	assert_eq!(report.errors, 0);
	assert!(harness.client.queue().is_empty().await.unwrap());
	assert!(harness.client.queue().offline_orders().await.unwrap().is_empty());

	let last_sync = harness
		.client
		.queue()
		.get_setting(LAST_SYNC_TIME)
		.await
		.unwrap()
		.expect("lastSyncTime after a productive pass");
	let last_sync = chrono::DateTime::parse_from_rfc3339(last_sync.as_str().unwrap()).unwrap();
	assert!(chrono::Utc::now().signed_duration_since(last_sync) < chrono::Duration::minutes(1));

	let session = harness
		.server
		.sessions()
		.get(report.session_id.expect("session"))
		.await
		.unwrap();
	assert_eq!(session.status, SyncStatus::Completed);
	assert_eq!(session.total_records, 3);
	assert_eq!(session.processed_records, 3);
	assert_eq!(session.progress_percentage, 100);
	assert_eq!(session.metadata["completionDetails"]["ordersProcessed"], 3);

	for offline_id in &offline_ids {
		let order = harness
			.server
			.orders()
			.find_by_offline_id(offline_id)
			.await
			.unwrap()
			.expect("order on server");
		assert!(order.offline_created);
		assert_eq!(order.total, 4.95);
	}
}

#[tokio::test]
async fn duplicate_redelivery_creates_one_order() {
	let harness = SyncHarness::new().await;
	harness.disconnect();

	let offline_id = harness.client.queue().next_offline_id().await.unwrap();
	let order = harness
		.draft("Flat White")
		.into_offline(offline_id.clone(), chrono::Utc::now());
	let mutation = Mutation::CreateOrder { order };

	let queue = harness.client.queue();
	queue.enqueue(mutation.clone(), Default::default()).await.unwrap();
	queue.enqueue(mutation, Default::default()).await.unwrap();
	assert_eq!(queue.len().await.unwrap(), 2);
	assert_eq!(queue.offline_orders().await.unwrap().len(), 1);

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 2);
	assert!(queue.is_empty().await.unwrap());
	assert_eq!(
		harness.server.orders().count_by_offline_id(&offline_id).await.unwrap(),
		1
	);
}

#[tokio::test]
async fn empty_queue_drain_is_a_no_op() {
	let harness = SyncHarness::new().await;

	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 0);
	assert_eq!(report.errors, 0);
	assert_eq!(report.session_id, None);
	assert!(harness.client.queue().is_empty().await.unwrap());
	assert_eq!(harness.client.queue().get_setting(LAST_SYNC_TIME).await.unwrap(), None);

	let history = harness
		.server
		.sessions()
		.history(HistoryQuery::default())
		.await
		.unwrap();
	assert_eq!(history.total, 0);
}

#[tokio::test]
async fn one_bad_order_does_not_block_the_batch() {
	let harness = SyncHarness::new().await;
	harness.disconnect();

	let queue = harness.client.queue();
	for product in ["Latte", "Broken", "Cortado"] {
		let offline_id = queue.next_offline_id().await.unwrap();
		let mut order = harness.draft(product).into_offline(offline_id, chrono::Utc::now());
		if product == "Broken" {
			order.items[0].quantity = 0;
		}
		queue
			.enqueue(Mutation::CreateOrder { order }, Default::default())
			.await
			.unwrap();
	}

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 2);
	assert_eq!(report.errors, 1);

	let remaining = queue.snapshot().await.unwrap();
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].attempt_count, 1);
	assert!(remaining[0].last_error.as_deref().unwrap().contains("quantity"));
	assert_eq!(harness.server.orders().count().await.unwrap(), 2);

	// The same batch straight against the ingestor reports per item
	let orders = queue.offline_orders().await.unwrap();
	let results = harness.server.ingestor().ingest(orders).await.unwrap();
	assert_eq!(results.len(), 1);
	assert_eq!(results[0].status, IngestStatus::Error);
}

#[tokio::test]
async fn writes_to_one_order_replay_in_enqueue_order() {
	let harness = SyncHarness::new().await;
	let (first, _) = place_online(&harness, "Espresso").await;
	let (second, _) = place_online(&harness, "Macchiato").await;

	harness.disconnect();
	let interceptor = harness.client.interceptor();
	for status in [OrderStatus::Confirmed, OrderStatus::Preparing, OrderStatus::Ready] {
		interceptor.update_order_status(first, status, None).await.unwrap();
	}
	interceptor
		.update_order_status(second, OrderStatus::Cancelled, Some("customer left".into()))
		.await
		.unwrap();
	interceptor
		.update_order_status(first, OrderStatus::Completed, None)
		.await
		.unwrap();

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(report.synced, 5);

	let delivered: Vec<String> = harness
		.transport
		.delivered()
		.await
		.into_iter()
		.filter(|target| target.starts_with(&format!("/orders/{}", first)))
		.collect();
	assert_eq!(delivered.len(), 4);

	let orders = harness.server.orders();
	let first = orders.get(first).await.unwrap();
	assert_eq!(first.status, OrderStatus::Completed);
	// create + 4 status changes
	assert_eq!(first.version, 5);
	assert_eq!(orders.get(second).await.unwrap().status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn interrupted_drain_loses_nothing() {
	let harness = SyncHarness::new().await;
	let (order_id, _) = place_online(&harness, "Ristretto").await;

	harness.disconnect();
	let interceptor = harness.client.interceptor();
	for status in [OrderStatus::Confirmed, OrderStatus::Preparing, OrderStatus::Ready] {
		interceptor.update_order_status(order_id, status, None).await.unwrap();
	}

	// The link drops after the first write gets through
	harness.reconnect();
	harness.transport.drop_after(1);
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 1);
	assert_eq!(report.errors, 1);
	assert!(!harness.client.monitor().is_reachable());

	let remaining = harness.client.queue().snapshot().await.unwrap();
	assert_eq!(remaining.len(), 2);
	assert_eq!(remaining[0].attempt_count, 1);
	assert_eq!(remaining[1].attempt_count, 0);
	assert_eq!(
		harness.server.orders().get(order_id).await.unwrap().status,
		OrderStatus::Confirmed
	);

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(report.synced, 2);
	assert!(harness.client.queue().is_empty().await.unwrap());
	assert_eq!(
		harness.server.orders().get(order_id).await.unwrap().status,
		OrderStatus::Ready
	);
}

#[tokio::test]
async fn queue_survives_a_client_restart() {
	let SyncHarness {
		server,
		store,
		transport,
		client,
		temp_dir,
	} = SyncHarness::new().await;

	transport.go_offline();
	client
		.interceptor()
		.create_order(draft_for(store.id, "Cappuccino"))
		.await
		.unwrap();
	let config = client.config().clone();
	client.close().await.unwrap();

	transport.go_online();
	let reopened = pos_sync_core::SyncClient::open(config, transport.clone())
		.await
		.unwrap();
	assert_eq!(reopened.queue().len().await.unwrap(), 1);

	let report = drained(reopened.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(report.synced, 1);
	assert_eq!(server.orders().count().await.unwrap(), 1);

	reopened.close().await.unwrap();
	drop(temp_dir);
}

#[tokio::test]
async fn failing_operation_becomes_stuck_after_its_bound() {
	let harness = SyncHarness::with_config(|config| config.sync.max_attempts = 2).await;
	let (order_id, _) = place_online(&harness, "Doppio").await;
	let mut events = harness.client.events().subscribe();

	harness.disconnect();
	harness
		.client
		.interceptor()
		.update_order_status(order_id, OrderStatus::Ready, None)
		.await
		.unwrap();

	harness.reconnect();
	harness.transport.set_faulty(true);

	let first = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(first.errors, 1);
	assert!(first.stuck.is_empty());
	// Nothing was delivered, so the last sync time stays unset
	assert_eq!(harness.client.queue().get_setting(LAST_SYNC_TIME).await.unwrap(), None);

	let second = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(second.stuck.len(), 1);
	assert_eq!(second.stuck[0].attempts, 2);

	let event = timeout(
		Duration::from_secs(1),
		events.recv_filtered(|e| matches!(e, Event::OperationStuck { .. })),
	)
	.await
	.unwrap()
	.unwrap();
	let Event::OperationStuck { attempts, .. } = event else {
		unreachable!();
	};
	assert_eq!(attempts, 2);

	// Stuck items are reported but no longer attempted
	let third = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(third.errors, 0);
	assert_eq!(third.stuck.len(), 1);

	// Nothing got through, so the session was marked failed
	let failed = harness
		.server
		.sessions()
		.history(HistoryQuery {
			status: Some(SyncStatus::Failed),
			..Default::default()
		})
		.await
		.unwrap();
	assert_eq!(failed.total, 2);

	let queue = harness.client.queue();
	let stuck = queue.stuck().await.unwrap();
	assert_eq!(stuck.len(), 1);

	harness.transport.set_faulty(false);
	queue.retry(stuck[0].id).await.unwrap();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(report.synced, 1);
	assert_eq!(
		harness.server.orders().get(order_id).await.unwrap().status,
		OrderStatus::Ready
	);
}

#[tokio::test]
async fn stuck_write_holds_back_later_writes_to_its_order() {
	let harness = SyncHarness::with_config(|config| config.sync.max_attempts = 1).await;
	let (order_id, _) = place_online(&harness, "Cortadito").await;
	let (other_id, _) = place_online(&harness, "Piccolo").await;

	harness.disconnect();
	let interceptor = harness.client.interceptor();
	for status in [OrderStatus::Preparing, OrderStatus::Ready] {
		interceptor.update_order_status(order_id, status, None).await.unwrap();
	}

	// The first write exhausts its single attempt against a failing server
	harness.reconnect();
	harness.transport.set_faulty(true);
	let first = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(first.synced, 0);
	assert_eq!(first.stuck.len(), 1);
	assert_eq!(first.blocked.len(), 1);

	let queue = harness.client.queue();
	let stuck = queue.stuck().await.unwrap();
	let held = queue.snapshot().await.unwrap();
	assert_eq!(stuck.len(), 1);
	assert_eq!(held[1].attempt_count, 0);
	assert_eq!(first.blocked, vec![held[1].id]);

	// A healthy server still gets nothing from this order until the stuck
	// write is dealt with; other orders are unaffected
	harness.transport.set_faulty(false);
	interceptor
		.update_order_status(other_id, OrderStatus::Confirmed, None)
		.await
		.unwrap();
	assert_eq!(queue.len().await.unwrap(), 2);

	let second = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(second.synced, 0);
	assert_eq!(second.stuck.len(), 1);
	assert_eq!(second.blocked, vec![held[1].id]);
	assert_eq!(second.session_id, None);
	assert_eq!(
		harness.server.orders().get(order_id).await.unwrap().status,
		OrderStatus::Pending
	);
	assert_eq!(
		harness.server.orders().get(other_id).await.unwrap().status,
		OrderStatus::Confirmed
	);

	queue.retry(stuck[0].id).await.unwrap();
	let third = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());
	assert_eq!(third.synced, 2);
	assert!(third.stuck.is_empty());
	assert!(third.blocked.is_empty());
	assert!(queue.is_empty().await.unwrap());
	assert_eq!(
		harness.server.orders().get(order_id).await.unwrap().status,
		OrderStatus::Ready
	);
}

#[tokio::test]
async fn queue_failure_mid_pass_still_closes_the_session() {
	let harness = SyncHarness::new().await;
	harness.disconnect();
	harness
		.client
		.interceptor()
		.create_order(harness.draft("Bombón"))
		.await
		.unwrap();

	// The client's queue table disappears while the batch is in flight
	let side_channel = Database::open_client(harness.client.config().database_path())
		.await
		.unwrap();
	let conn = side_channel.conn().clone();
	harness
		.transport
		.set_after_ingest(move || {
			let conn = conn.clone();
			async move {
				conn.execute_unprepared("DROP TABLE pending_requests")
					.await
					.unwrap();
			}
		})
		.await;

	let mut events = harness.client.events().subscribe();
	harness.reconnect();
	let result = harness.client.agent().drain(Trigger::Manual).await;
	assert!(result.is_err());

	let finished = timeout(
		Duration::from_secs(1),
		events.recv_filtered(|e| matches!(e, Event::DrainFinished { .. })),
	)
	.await
	.expect("drain finished event")
	.unwrap();
	assert!(matches!(finished, Event::DrainFinished { synced: 0, .. }));

	let sessions = harness.server.sessions();
	assert!(sessions
		.active_sessions(Some(harness.store.id))
		.await
		.unwrap()
		.is_empty());
	let history = sessions.history(HistoryQuery::default()).await.unwrap();
	assert_eq!(history.total, 1);
	assert_eq!(history.sessions[0].status, SyncStatus::Failed);
	assert!(history.sessions[0].end_time.is_some());

	// The order itself did reach the server
	assert_eq!(harness.server.orders().count().await.unwrap(), 1);
	side_channel.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_triggers_run_a_single_pass() {
	let harness = SyncHarness::new().await;
	harness.disconnect();
	harness
		.client
		.interceptor()
		.create_order(harness.draft("Lungo"))
		.await
		.unwrap();

	harness.reconnect();
	harness.transport.set_delay(Duration::from_millis(200)).await;

	let agent = harness.client.agent();
	let (a, b) = tokio::join!(agent.drain(Trigger::Manual), agent.drain(Trigger::Timer));
	let outcomes = [a.unwrap(), b.unwrap()];

	let passes = outcomes
		.iter()
		.filter(|o| matches!(o, DrainOutcome::Drained(_)))
		.count();
	let suppressed = outcomes
		.iter()
		.filter(|o| matches!(o, DrainOutcome::AlreadyDraining))
		.count();
	assert_eq!(passes, 1);
	assert_eq!(suppressed, 1);
	assert_eq!(harness.server.orders().count().await.unwrap(), 1);
}

#[tokio::test]
async fn stale_update_is_recorded_as_a_conflict() {
	let harness = SyncHarness::new().await;
	let (order_id, version) = place_online(&harness, "Affogato").await;

	harness.disconnect();
	harness
		.client
		.interceptor()
		.update_order(
			order_id,
			version,
			OrderChanges {
				table_number: Some("7".into()),
				..Default::default()
			},
		)
		.await
		.unwrap();

	// Someone else moves the order on while the register is offline
	harness
		.server
		.orders()
		.update_status(order_id, OrderStatus::Preparing, None)
		.await
		.unwrap();

	harness.reconnect();
	let report = drained(harness.client.agent().drain(Trigger::Manual).await.unwrap());

	assert_eq!(report.synced, 0);
	assert_eq!(report.conflicts.len(), 1);
	let conflict = &report.conflicts[0];
	assert_eq!(conflict.entity_id, order_id.to_string());
	assert_eq!(conflict.local_version["tableNumber"], "7");
	assert_eq!(conflict.server_version["version"], version + 1);
	assert!(harness.client.queue().is_empty().await.unwrap());

	let session = harness
		.server
		.sessions()
		.get(report.session_id.unwrap())
		.await
		.unwrap();
	assert_eq!(session.status, SyncStatus::Completed);
	assert_eq!(session.conflicts.len(), 1);
	assert_eq!(session.processed_records, 1);

	let order = harness.server.orders().get(order_id).await.unwrap();
	assert_eq!(order.table_number, None);
}

#[tokio::test]
async fn running_agent_drains_when_connectivity_returns() {
	let harness = SyncHarness::new().await;
	harness.client.start(false);

	harness.disconnect();
	for product in ["Galão", "Bica"] {
		harness
			.client
			.interceptor()
			.create_order(harness.draft(product))
			.await
			.unwrap();
	}

	let mut events = harness.client.events().subscribe();
	harness.reconnect();

	let finished = timeout(
		Duration::from_secs(5),
		events.recv_filtered(|e| matches!(e, Event::DrainFinished { .. })),
	)
	.await
	.expect("drain after reconnect")
	.unwrap();
	assert!(matches!(finished, Event::DrainFinished { synced: 2, .. }));
	assert!(harness.client.queue().is_empty().await.unwrap());

	// A manual trigger through the running loop finds nothing left
	let outcome = harness.client.sync_now().await.unwrap();
	assert_eq!(outcome.report().map(|r| r.synced), Some(0));

	harness.client.shutdown().await;
}
