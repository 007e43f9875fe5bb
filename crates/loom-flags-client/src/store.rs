// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The installed snapshot and its publication.
//!
//! Readers load the current [`FlagSnapshot`] without locking. Writers are
//! serialized by an install lock which also assigns the global sequence
//! number and queues the resulting change batch for listener dispatch, so
//! batches reach the dispatcher in install order.

use std::sync::Arc;

use arc_swap::ArcSwap;
use loom_flags_client_core::{
	DataSourceEvent, Flag, FlagChange, FlagSnapshot, SnapshotOrigin,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Changes produced by one snapshot install.
#[derive(Debug, Clone)]
pub(crate) struct ChangeBatch {
	pub sequence: u64,
	pub changes: Vec<FlagChange>,
}

/// Summary of a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Installed {
	pub sequence: u64,
	pub changed: usize,
}

struct InstallState {
	last_sequence: u64,
	changes_tx: Option<mpsc::UnboundedSender<ChangeBatch>>,
}

pub(crate) struct SnapshotStore {
	environment: String,
	current: ArcSwap<FlagSnapshot>,
	install: Mutex<InstallState>,
}

impl SnapshotStore {
	pub fn new(
		environment: impl Into<String>,
		changes_tx: mpsc::UnboundedSender<ChangeBatch>,
	) -> Self {
		Self {
			environment: environment.into(),
			current: ArcSwap::from_pointee(FlagSnapshot::empty()),
			install: Mutex::new(InstallState {
				last_sequence: 0,
				changes_tx: Some(changes_tx),
			}),
		}
	}

	/// Returns the installed snapshot.
	pub fn load(&self) -> Arc<FlagSnapshot> {
		self.current.load_full()
	}

	/// Folds a data source update into a new snapshot and installs it.
	/// Returns `None` for a stale patch or delete, or a failure event.
	pub fn apply(&self, event: DataSourceEvent) -> Option<Installed> {
		match event {
			DataSourceEvent::Put(flags) => {
				let count = flags.len();
				let installed = self.install_with(|_, seq| {
					Some(FlagSnapshot::from_flags(seq, SnapshotOrigin::DataSource, flags))
				});
				debug!(environment = %self.environment, flags = count, "Applied put");
				installed
			}
			DataSourceEvent::Patch(flag) => {
				let key = flag.key.clone();
				let version = flag.version;
				let installed = self.install_with(|current, seq| current.with_upsert(flag, seq));
				if installed.is_none() {
					warn!(
						environment = %self.environment,
						flag_key = %key,
						version,
						"Dropping stale patch"
					);
				}
				installed
			}
			DataSourceEvent::Delete(data) => {
				let installed = self.install_with(|current, seq| {
					current.with_delete(&data.key, data.version, seq)
				});
				if installed.is_none() {
					warn!(
						environment = %self.environment,
						flag_key = %data.key,
						version = data.version,
						"Dropping stale delete"
					);
				}
				installed
			}
			DataSourceEvent::Failed(_) => None,
		}
	}

	/// Installs flags restored from persistence, unless a data source
	/// snapshot has already been installed.
	pub fn restore(&self, flags: Vec<Flag>) -> Option<Installed> {
		let installed = self.install_with(|current, seq| {
			if current.origin() == SnapshotOrigin::DataSource {
				return None;
			}
			Some(FlagSnapshot::from_flags(seq, SnapshotOrigin::Persistence, flags))
		});
		if installed.is_none() {
			debug!(
				environment = %self.environment,
				"Ignoring restore, a fresher snapshot is installed"
			);
		}
		installed
	}

	/// Stops publishing change batches. The dispatcher drains what it has
	/// and exits once its receiver is empty.
	pub fn close_changes(&self) {
		self.install.lock().changes_tx = None;
	}

	fn install_with<F>(&self, build: F) -> Option<Installed>
	where
		F: FnOnce(&FlagSnapshot, u64) -> Option<FlagSnapshot>,
	{
		let mut state = self.install.lock();
		let previous = self.current.load_full();
		let sequence = state.last_sequence + 1;

		let next = Arc::new(build(&*previous, sequence)?);
		let changes = previous.diff(&next);

		self.current.store(Arc::clone(&next));
		state.last_sequence = sequence;

		let changed = changes.len();
		if !changes.is_empty() {
			if let Some(tx) = &state.changes_tx {
				let _ = tx.send(ChangeBatch { sequence, changes });
			}
		}

		debug!(
			environment = %self.environment,
			sequence,
			origin = ?next.origin(),
			changed,
			"Snapshot installed"
		);
		Some(Installed { sequence, changed })
	}
}
