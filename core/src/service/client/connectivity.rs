//! Connectivity monitor
//!
//! Tracks whether the sync server is reachable. Observations come from the
//! periodic probe and from the outcome of real requests; only edges are
//! published. The monitor never fails: anything it cannot determine counts
//! as unreachable, which is also the initial state.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::infra::event::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
	Reachable,
	#[default]
	Unreachable,
}

impl Connectivity {
	pub fn is_reachable(&self) -> bool {
		matches!(self, Connectivity::Reachable)
	}

	pub fn from_reachable(reachable: bool) -> Self {
		if reachable {
			Connectivity::Reachable
		} else {
			Connectivity::Unreachable
		}
	}
}

/// Something that can tell whether the server answers right now
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
	async fn probe(&self) -> Connectivity;
}

type Listener = Box<dyn Fn(Connectivity) + Send + Sync>;

pub struct ConnectivityMonitor {
	state: watch::Sender<Connectivity>,
	listeners: Mutex<Vec<Listener>>,
	events: Option<EventBus>,
}

impl ConnectivityMonitor {
	pub fn new() -> Self {
		let (state, _) = watch::channel(Connectivity::Unreachable);
		Self {
			state,
			listeners: Mutex::new(Vec::new()),
			events: None,
		}
	}

	/// Publish `ConnectivityChanged` on the bus for every edge
	pub fn with_events(mut self, events: EventBus) -> Self {
		self.events = Some(events);
		self
	}

	pub fn current_state(&self) -> Connectivity {
		*self.state.borrow()
	}

	pub fn is_reachable(&self) -> bool {
		self.current_state().is_reachable()
	}

	/// Register a callback invoked once per observed edge. Callbacks run
	/// synchronously under the listener lock and must not call back into the
	/// monitor.
	pub fn on_transition<F>(&self, callback: F)
	where
		F: Fn(Connectivity) + Send + Sync + 'static,
	{
		self.listeners.lock().push(Box::new(callback));
	}

	/// Async view of the state for tasks; `changed()` fires on each edge
	pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
		self.state.subscribe()
	}

	/// Feed an observation. Returns true if it was an edge.
	pub fn report(&self, observed: Connectivity) -> bool {
		// Held across the state change and its notifications so concurrent
		// reporters deliver edges in the order they were applied
		let listeners = self.listeners.lock();

		let changed = self.state.send_if_modified(|current| {
			if *current == observed {
				false
			} else {
				*current = observed;
				true
			}
		});

		if changed {
			info!(state = ?observed, "Connectivity changed");

			for listener in listeners.iter() {
				listener(observed);
			}

			if let Some(events) = &self.events {
				events.emit(Event::ConnectivityChanged {
					reachable: observed.is_reachable(),
				});
			}
		}

		changed
	}

	/// Spawn the background probe loop. It stops on the shutdown signal.
	pub fn spawn_probe(
		self: &Arc<Self>,
		probe: Arc<dyn ConnectivityProbe>,
		interval: Duration,
		mut shutdown: broadcast::Receiver<()>,
	) -> JoinHandle<()> {
		let monitor = Arc::clone(self);

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = ticker.tick() => {
						let observed = probe.probe().await;
						debug!(state = ?observed, "Connectivity probe");
						monitor.report(observed);
					}
					_ = shutdown.recv() => {
						debug!("Connectivity probe stopping");
						break;
					}
				}
			}
		})
	}
}

impl Default for ConnectivityMonitor {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	#[test]
	fn starts_unreachable() {
		let monitor = ConnectivityMonitor::new();
		assert_eq!(monitor.current_state(), Connectivity::Unreachable);
		assert!(!monitor.is_reachable());
	}

	#[test]
	fn listeners_fire_once_per_edge() {
		let monitor = ConnectivityMonitor::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let counter = calls.clone();
		monitor.on_transition(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		assert!(!monitor.report(Connectivity::Unreachable));
		assert!(monitor.report(Connectivity::Reachable));
		assert!(!monitor.report(Connectivity::Reachable));
		assert!(!monitor.report(Connectivity::Reachable));
		assert!(monitor.report(Connectivity::Unreachable));

		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn concurrent_reporters_deliver_edges_in_order() {
		let monitor = Arc::new(ConnectivityMonitor::new());
		let seen = Arc::new(Mutex::new(Vec::new()));

		let log = seen.clone();
		monitor.on_transition(move |state| log.lock().push(state));

		let reporters: Vec<_> = [Connectivity::Reachable, Connectivity::Unreachable]
			.into_iter()
			.map(|state| {
				let monitor = monitor.clone();
				std::thread::spawn(move || {
					for _ in 0..500 {
						monitor.report(state);
					}
				})
			})
			.collect();
		for reporter in reporters {
			reporter.join().unwrap();
		}

		let seen = seen.lock();
		assert!(!seen.is_empty());
		assert_eq!(seen[0], Connectivity::Reachable);
		assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
		assert_eq!(seen.last().copied(), Some(monitor.current_state()));
	}

	#[tokio::test]
	async fn subscribers_see_transitions() {
		let monitor = ConnectivityMonitor::new();
		let mut rx = monitor.subscribe();

		monitor.report(Connectivity::Reachable);
		rx.changed().await.unwrap();
		assert_eq!(*rx.borrow_and_update(), Connectivity::Reachable);
	}

	#[tokio::test]
	async fn edges_are_published_on_the_bus() {
		let events = EventBus::new(8);
		let mut sub = events.subscribe();
		let monitor = ConnectivityMonitor::new().with_events(events);

		monitor.report(Connectivity::Reachable);
		monitor.report(Connectivity::Reachable);

		assert!(matches!(
			sub.recv().await.unwrap(),
			Event::ConnectivityChanged { reachable: true }
		));
		assert!(sub.try_recv().is_err());
	}

	struct FlagProbe(Arc<AtomicBool>);

	#[async_trait]
	impl ConnectivityProbe for FlagProbe {
		async fn probe(&self) -> Connectivity {
			Connectivity::from_reachable(self.0.load(Ordering::SeqCst))
		}
	}

	#[tokio::test]
	async fn probe_loop_reports_observations() {
		let monitor = Arc::new(ConnectivityMonitor::new());
		let up = Arc::new(AtomicBool::new(true));
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let mut rx = monitor.subscribe();

		let handle = monitor.spawn_probe(
			Arc::new(FlagProbe(up.clone())),
			Duration::from_millis(10),
			shutdown_rx,
		);

		rx.changed().await.unwrap();
		assert!(monitor.is_reachable());

		up.store(false, Ordering::SeqCst);
		rx.changed().await.unwrap();
		assert!(!monitor.is_reachable());

		shutdown_tx.send(()).unwrap();
		handle.await.unwrap();
	}
}
