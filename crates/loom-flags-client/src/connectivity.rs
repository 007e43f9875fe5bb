// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Online, offline and background syncing.
//!
//! While syncing, two tasks run: the data source, and an applier that folds
//! its events into the snapshot store. Going offline aborts both. Installs
//! contain no await points, so an abort never leaves a partial snapshot.

use std::sync::Arc;

use loom_flags_client_core::{ClientStatus, DataSourceEvent, SyncError};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data_source::{SharedDataSource, SyncMode};
use crate::persistence::SharedFlagPersistence;
use crate::status::StatusTracker;
use crate::store::SnapshotStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the applier task needs.
#[derive(Clone)]
pub(crate) struct SyncTarget {
	pub environment: String,
	pub mobile_key: String,
	pub store: Arc<SnapshotStore>,
	pub status: Arc<StatusTracker>,
	pub persistence: Option<SharedFlagPersistence>,
}

struct SyncTasks {
	mode: SyncMode,
	source: JoinHandle<()>,
	applier: JoinHandle<()>,
}

impl SyncTasks {
	fn abort(self) {
		self.source.abort();
		self.applier.abort();
	}
}

struct ConnectivityState {
	offline: bool,
	background: bool,
	closed: bool,
	tasks: Option<SyncTasks>,
}

pub(crate) struct ConnectivityController {
	runtime: Handle,
	source: SharedDataSource,
	target: SyncTarget,
	disable_background_updating: bool,
	state: Mutex<ConnectivityState>,
}

impl ConnectivityController {
	pub fn new(
		runtime: Handle,
		source: SharedDataSource,
		target: SyncTarget,
		offline: bool,
		disable_background_updating: bool,
	) -> Self {
		Self {
			runtime,
			source,
			target,
			disable_background_updating,
			state: Mutex::new(ConnectivityState {
				offline,
				background: false,
				closed: false,
				tasks: None,
			}),
		}
	}

	/// Starts syncing unless configured offline.
	pub fn start(&self) {
		let mut state = self.state.lock();
		self.reconcile(&mut state);
	}

	pub fn set_online(&self) {
		let mut state = self.state.lock();
		if state.offline {
			info!(environment = %self.target.environment, "Going online");
			state.offline = false;
		}
		self.reconcile(&mut state);
	}

	pub fn set_offline(&self) {
		let mut state = self.state.lock();
		if !state.offline {
			info!(environment = %self.target.environment, "Going offline");
			state.offline = true;
		}
		self.reconcile(&mut state);
	}

	pub fn set_background(&self, background: bool) {
		let mut state = self.state.lock();
		if state.background != background {
			debug!(
				environment = %self.target.environment,
				background,
				"Background mode changed"
			);
			state.background = background;
		}
		self.reconcile(&mut state);
	}

	pub fn is_offline(&self) -> bool {
		self.state.lock().offline
	}

	pub fn is_background(&self) -> bool {
		self.state.lock().background
	}

	/// Returns the mode of the running sync, if any.
	pub fn sync_mode(&self) -> Option<SyncMode> {
		self.state.lock().tasks.as_ref().map(|tasks| tasks.mode)
	}

	/// Stops syncing permanently.
	pub fn shutdown(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		self.reconcile(&mut state);
	}

	/// Starts, stops or restarts the sync tasks to match the state.
	fn reconcile(&self, state: &mut ConnectivityState) {
		let desired = if state.closed || state.offline {
			None
		} else if state.background {
			(!self.disable_background_updating).then_some(SyncMode::Background)
		} else {
			Some(SyncMode::Foreground)
		};

		let running = state.tasks.as_ref().map(|tasks| tasks.mode);
		if running == desired {
			return;
		}

		if let Some(tasks) = state.tasks.take() {
			debug!(environment = %self.target.environment, mode = ?tasks.mode, "Stopping sync");
			tasks.abort();
		}
		if let Some(mode) = desired {
			state.tasks = Some(self.spawn(mode));
		}
	}

	fn spawn(&self, mode: SyncMode) -> SyncTasks {
		debug!(environment = %self.target.environment, mode = ?mode, "Starting sync");
		let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

		let source = Arc::clone(&self.source);
		let source = self.runtime.spawn(async move { source.run(mode, tx).await });
		let applier = self.runtime.spawn(apply_events(self.target.clone(), rx));

		SyncTasks {
			mode,
			source,
			applier,
		}
	}
}

impl Drop for ConnectivityController {
	fn drop(&mut self) {
		if let Some(tasks) = self.state.get_mut().tasks.take() {
			tasks.abort();
		}
	}
}

async fn apply_events(target: SyncTarget, mut rx: mpsc::Receiver<DataSourceEvent>) {
	while let Some(event) = rx.recv().await {
		match event {
			DataSourceEvent::Failed(e) => handle_failure(&target, &e),
			DataSourceEvent::Put(flags) => {
				if let Some(installed) = target.store.apply(DataSourceEvent::Put(flags)) {
					info!(
						environment = %target.environment,
						sequence = installed.sequence,
						changed = installed.changed,
						"Installed flags from data source"
					);
					target.status.transition(ClientStatus::Initialized);
					persist(&target).await;
				}
			}
			update => {
				target.store.apply(update);
			}
		}
	}
}

fn handle_failure(target: &SyncTarget, e: &SyncError) {
	match target.status.current() {
		ClientStatus::Initializing => {
			error!(environment = %target.environment, error = %e, "Initial sync failed");
			target.status.transition(ClientStatus::Failed);
		}
		status => {
			warn!(
				environment = %target.environment,
				status = %status,
				error = %e,
				"Sync failed, serving last known flags"
			);
		}
	}
}

async fn persist(target: &SyncTarget) {
	let Some(persistence) = &target.persistence else {
		return;
	};
	let data = match target.store.load().to_json_string() {
		Ok(data) => data,
		Err(e) => {
			error!(environment = %target.environment, error = %e, "Failed to serialize flags");
			return;
		}
	};
	if let Err(e) = persistence.save(&target.mobile_key, &data).await {
		error!(environment = %target.environment, error = %e, "Failed to persist flags");
	}
}
