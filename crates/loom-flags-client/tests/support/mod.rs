// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_flags_client::{
	ClientConfig, ClientStatus, DataSource, DataSourceEvent, EventPayload, EventSender, Flag,
	FlagChangeKind, FlagListener, OutputEvent, SharedDataSource, SyncError, SyncMode,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const MOBILE_KEY: &str = "mob-test-1";
pub const WAIT: Duration = Duration::from_secs(2);

/// A data source that forwards whatever the test feeds it.
pub struct ScriptedSource {
	rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DataSourceEvent>>,
	runs: AtomicUsize,
	modes: Mutex<Vec<SyncMode>>,
}

#[async_trait]
impl DataSource for ScriptedSource {
	async fn run(&self, mode: SyncMode, events: mpsc::Sender<DataSourceEvent>) {
		self.runs.fetch_add(1, Ordering::SeqCst);
		self.modes.lock().push(mode);
		let mut rx = self.rx.lock().await;
		loop {
			tokio::select! {
				event = rx.recv() => match event {
					Some(event) => {
						if events.send(event).await.is_err() {
							break;
						}
					}
					None => {
						events.closed().await;
						break;
					}
				},
				_ = events.closed() => break,
			}
		}
	}
}

/// Test-side handle for a [`ScriptedSource`].
#[derive(Clone)]
pub struct Feed {
	tx: mpsc::UnboundedSender<DataSourceEvent>,
	source: Arc<ScriptedSource>,
}

impl Feed {
	pub fn new() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			tx,
			source: Arc::new(ScriptedSource {
				rx: tokio::sync::Mutex::new(rx),
				runs: AtomicUsize::new(0),
				modes: Mutex::new(Vec::new()),
			}),
		}
	}

	pub fn source(&self) -> SharedDataSource {
		Arc::clone(&self.source) as SharedDataSource
	}

	/// A factory serving this feed to every environment.
	pub fn factory(&self) -> impl Fn(&ClientConfig) -> SharedDataSource + Send + Sync + 'static {
		let source = self.source();
		move |_config: &ClientConfig| Arc::clone(&source)
	}

	pub fn put(&self, flags: Vec<Flag>) {
		self.send(DataSourceEvent::Put(flags));
	}

	pub fn patch(&self, flag: Flag) {
		self.send(DataSourceEvent::Patch(flag));
	}

	pub fn delete(&self, key: &str, version: u64) {
		self.send(DataSourceEvent::delete(key, version));
	}

	pub fn fail(&self, error: SyncError) {
		self.send(DataSourceEvent::Failed(error));
	}

	pub fn runs(&self) -> usize {
		self.source.runs.load(Ordering::SeqCst)
	}

	pub fn modes(&self) -> Vec<SyncMode> {
		self.source.modes.lock().clone()
	}

	fn send(&self, event: DataSourceEvent) {
		self.tx.send(event).unwrap();
	}
}

/// One feed per mobile key.
#[derive(Clone, Default)]
pub struct Feeds {
	feeds: Arc<Mutex<HashMap<String, Feed>>>,
}

impl Feeds {
	pub fn get(&self, mobile_key: &str) -> Feed {
		self.feeds
			.lock()
			.entry(mobile_key.to_string())
			.or_insert_with(Feed::new)
			.clone()
	}

	pub fn factory(&self) -> impl Fn(&ClientConfig) -> SharedDataSource + Send + Sync + 'static {
		let feeds = self.clone();
		move |config: &ClientConfig| feeds.get(&config.mobile_key).source()
	}
}

/// Records flag change notifications.
#[derive(Clone, Default)]
pub struct Recorder {
	calls: Arc<Mutex<Vec<(String, FlagChangeKind)>>>,
}

impl Recorder {
	pub fn listener(&self) -> impl FlagListener + 'static {
		let calls = Arc::clone(&self.calls);
		move |key: &str, kind: FlagChangeKind| calls.lock().push((key.to_string(), kind))
	}

	pub fn calls(&self) -> Vec<(String, FlagChangeKind)> {
		self.calls.lock().clone()
	}

	pub fn count(&self) -> usize {
		self.calls.lock().len()
	}

	/// Waits until at least `n` calls were recorded.
	pub async fn wait_for(&self, n: usize) -> Vec<(String, FlagChangeKind)> {
		wait_until(|| self.count() >= n).await;
		self.calls()
	}
}

/// Records status transitions.
#[derive(Clone, Default)]
pub struct StatusRecorder {
	statuses: Arc<Mutex<Vec<ClientStatus>>>,
}

impl StatusRecorder {
	pub fn listener(&self) -> impl Fn(ClientStatus) + Send + Sync + 'static {
		let statuses = Arc::clone(&self.statuses);
		move |status| statuses.lock().push(status)
	}

	pub fn statuses(&self) -> Vec<ClientStatus> {
		self.statuses.lock().clone()
	}
}

/// Records every delivered event payload.
#[derive(Clone, Default)]
pub struct EventLog {
	payloads: Arc<Mutex<Vec<EventPayload>>>,
}

impl EventLog {
	/// Keys of delivered custom events, in delivery order.
	pub fn custom_keys(&self) -> Vec<String> {
		self.payloads
			.lock()
			.iter()
			.flat_map(|p| p.events.iter())
			.filter_map(|e| match e {
				OutputEvent::Custom(c) => Some(c.key.clone()),
				OutputEvent::Feature(_) => None,
			})
			.collect()
	}

	/// Summary counters delivered for `key` as `(variation, count)`.
	pub fn counters(&self, key: &str) -> Vec<(Option<u32>, u64)> {
		self.payloads
			.lock()
			.iter()
			.filter_map(|p| p.summary.as_ref())
			.filter_map(|s| s.features.get(key))
			.flat_map(|f| f.counters.iter())
			.map(|c| (c.variation, c.count))
			.collect()
	}
}

#[async_trait]
impl EventSender for EventLog {
	async fn send(&self, _environment: &str, payload: EventPayload) -> loom_flags_client::Result<()> {
		self.payloads.lock().push(payload);
		Ok(())
	}
}

/// Polls `condition` until it holds, panicking after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

/// Gives background tasks a chance to act on anything already queued.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(50)).await;
}
