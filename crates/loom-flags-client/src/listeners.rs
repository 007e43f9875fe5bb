// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-key change listeners and their dispatcher.
//!
//! Change batches are delivered by a single background task, one batch at a
//! time, in install order. The set of listeners for a batch is resolved when
//! its dispatch cycle begins; the registry lock is never held while a
//! listener runs, so listeners may call back into the client.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use loom_flags_client_core::{FlagChange, FlagChangeKind};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::store::ChangeBatch;

/// Receives change notifications for a single flag key.
///
/// Listeners run on the client's dispatch task. They receive only the key
/// and kind of change and should read the current value through the client.
pub trait FlagListener: Send + Sync {
	fn on_flag_changed(&self, key: &str, kind: FlagChangeKind);
}

impl<F> FlagListener for F
where
	F: Fn(&str, FlagChangeKind) + Send + Sync,
{
	fn on_flag_changed(&self, key: &str, kind: FlagChangeKind) {
		self(key, kind)
	}
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Registration = (ListenerId, Arc<dyn FlagListener>);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
	next_id: AtomicU64,
	listeners: RwLock<HashMap<String, Vec<Registration>>>,
}

impl ListenerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, key: &str, listener: Arc<dyn FlagListener>) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		self
			.listeners
			.write()
			.entry(key.to_string())
			.or_default()
			.push((id, listener));
		debug!(flag_key = %key, listener = id.0, "Registered flag listener");
		id
	}

	/// Removes a registration. An in-flight call to it may still complete.
	pub fn unregister(&self, key: &str, id: ListenerId) -> bool {
		let mut listeners = self.listeners.write();
		let Some(registrations) = listeners.get_mut(key) else {
			return false;
		};
		let before = registrations.len();
		registrations.retain(|(existing, _)| *existing != id);
		let removed = registrations.len() != before;
		if registrations.is_empty() {
			listeners.remove(key);
		}
		removed
	}

	pub fn len(&self) -> usize {
		self.listeners.read().values().map(Vec::len).sum()
	}

	pub fn clear(&self) {
		self.listeners.write().clear();
	}

	/// Copies out the listeners for each change. Changes with no listeners
	/// are skipped.
	fn resolve(&self, changes: Vec<FlagChange>) -> Vec<(FlagChange, Vec<Arc<dyn FlagListener>>)> {
		let listeners = self.listeners.read();
		changes
			.into_iter()
			.filter_map(|change| {
				let targets: Vec<_> = listeners
					.get(&change.key)?
					.iter()
					.map(|(_, listener)| Arc::clone(listener))
					.collect();
				Some((change, targets))
			})
			.collect()
	}
}

/// Spawns the dispatch task. It exits once every sender of `rx` is gone
/// and the queue is drained.
pub(crate) fn spawn_dispatcher(
	runtime: &tokio::runtime::Handle,
	environment: String,
	registry: Arc<ListenerRegistry>,
	mut rx: mpsc::UnboundedReceiver<ChangeBatch>,
) -> JoinHandle<()> {
	runtime.spawn(async move {
		while let Some(batch) = rx.recv().await {
			dispatch(&environment, &registry, batch);
		}
		debug!(environment = %environment, "Listener dispatcher stopped");
	})
}

fn dispatch(environment: &str, registry: &ListenerRegistry, batch: ChangeBatch) {
	let targets = registry.resolve(batch.changes);
	let mut calls = 0usize;

	for (change, listeners) in targets {
		for listener in listeners {
			calls += 1;
			let outcome = catch_unwind(AssertUnwindSafe(|| {
				listener.on_flag_changed(&change.key, change.kind)
			}));
			if outcome.is_err() {
				error!(
					environment = %environment,
					flag_key = %change.key,
					"Flag listener panicked"
				);
			}
		}
	}

	debug!(
		environment = %environment,
		sequence = batch.sequence,
		calls,
		"Dispatched flag changes"
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	type Calls = Arc<Mutex<Vec<(String, FlagChangeKind)>>>;

	fn recorder(calls: &Calls) -> Arc<dyn FlagListener> {
		let calls = Arc::clone(calls);
		Arc::new(move |key: &str, kind: FlagChangeKind| {
			calls.lock().push((key.to_string(), kind));
		})
	}

	fn batch(sequence: u64, keys: &[&str]) -> ChangeBatch {
		ChangeBatch {
			sequence,
			changes: keys
				.iter()
				.map(|k| FlagChange::new(*k, FlagChangeKind::Updated))
				.collect(),
		}
	}

	#[test]
	fn test_register_and_unregister() {
		let registry = ListenerRegistry::new();
		let calls = Calls::default();
		let a = registry.register("flag-a", recorder(&calls));
		let b = registry.register("flag-a", recorder(&calls));
		assert_ne!(a, b);
		assert_eq!(registry.len(), 2);

		assert!(registry.unregister("flag-a", a));
		assert!(!registry.unregister("flag-a", a));
		assert!(!registry.unregister("flag-b", b));
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn test_dispatch_calls_each_listener_once_per_key() {
		let registry = ListenerRegistry::new();
		let calls = Calls::default();
		registry.register("flag-a", recorder(&calls));
		registry.register("flag-a", recorder(&calls));
		registry.register("flag-b", recorder(&calls));

		dispatch("default", &registry, batch(1, &["flag-a", "flag-c"]));

		let calls = calls.lock();
		assert_eq!(calls.len(), 2);
		assert!(calls.iter().all(|(k, _)| k == "flag-a"));
	}

	#[test]
	fn test_unregistered_before_cycle_gets_nothing() {
		let registry = ListenerRegistry::new();
		let calls = Calls::default();
		let id = registry.register("flag-a", recorder(&calls));
		registry.unregister("flag-a", id);

		dispatch("default", &registry, batch(1, &["flag-a"]));
		assert!(calls.lock().is_empty());
	}

	#[test]
	fn test_panicking_listener_does_not_stop_dispatch() {
		let registry = ListenerRegistry::new();
		let calls = Calls::default();
		registry.register(
			"flag-a",
			Arc::new(|_: &str, _: FlagChangeKind| panic!("listener failure")),
		);
		registry.register("flag-a", recorder(&calls));

		dispatch("default", &registry, batch(1, &["flag-a"]));
		assert_eq!(calls.lock().len(), 1);
	}

	#[test]
	fn test_listener_may_unregister_itself() {
		let registry = Arc::new(ListenerRegistry::new());
		let calls = Calls::default();
		let slot: Arc<Mutex<Option<ListenerId>>> = Arc::default();

		let listener = {
			let registry = Arc::clone(&registry);
			let slot = Arc::clone(&slot);
			let calls = Arc::clone(&calls);
			Arc::new(move |key: &str, kind: FlagChangeKind| {
				calls.lock().push((key.to_string(), kind));
				if let Some(id) = *slot.lock() {
					registry.unregister(key, id);
				}
			})
		};
		*slot.lock() = Some(registry.register("flag-a", listener));

		dispatch("default", &registry, batch(1, &["flag-a"]));
		dispatch("default", &registry, batch(2, &["flag-a"]));
		assert_eq!(calls.lock().len(), 1);
	}

	#[tokio::test]
	async fn test_dispatcher_delivers_in_order_and_drains() {
		let registry = Arc::new(ListenerRegistry::new());
		let calls = Calls::default();
		registry.register("a", recorder(&calls));
		registry.register("b", recorder(&calls));

		let (tx, rx) = mpsc::unbounded_channel();
		let handle = spawn_dispatcher(
			&tokio::runtime::Handle::current(),
			"default".to_string(),
			Arc::clone(&registry),
			rx,
		);

		tx.send(batch(1, &["a"])).unwrap();
		tx.send(batch(2, &["b"])).unwrap();
		tx.send(batch(3, &["a"])).unwrap();
		drop(tx);
		handle.await.unwrap();

		let keys: Vec<_> = calls.lock().iter().map(|(k, _)| k.clone()).collect();
		assert_eq!(keys, vec!["a", "b", "a"]);
	}
}
