// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client lifecycle tracking and initialization waiters.

use std::sync::Arc;
use std::time::Duration;

use loom_flags_client_core::ClientStatus;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tracing::{debug, info};

/// Receives every status transition after registration.
pub trait StatusListener: Send + Sync {
	fn on_status_changed(&self, status: ClientStatus);
}

impl<F> StatusListener for F
where
	F: Fn(ClientStatus) + Send + Sync,
{
	fn on_status_changed(&self, status: ClientStatus) {
		self(status)
	}
}

/// Shared status listener handle.
pub type SharedStatusListener = Arc<dyn StatusListener>;

/// Owns the current [`ClientStatus`] and enforces forward-only transitions.
pub(crate) struct StatusTracker {
	environment: String,
	tx: watch::Sender<ClientStatus>,
	listener: Mutex<Option<SharedStatusListener>>,
	notify: ReentrantMutex<()>,
}

impl StatusTracker {
	pub fn new(environment: impl Into<String>) -> Self {
		let (tx, _rx) = watch::channel(ClientStatus::Initializing);
		Self {
			environment: environment.into(),
			tx,
			listener: Mutex::new(None),
			notify: ReentrantMutex::new(()),
		}
	}

	pub fn current(&self) -> ClientStatus {
		*self.tx.borrow()
	}

	/// Replaces the status listener. Earlier transitions are not replayed.
	pub fn set_listener(&self, listener: Option<SharedStatusListener>) {
		*self.listener.lock() = listener;
	}

	/// Moves to `next` if that is a legal transition. Returns true if the
	/// status changed.
	///
	/// Notifications are serialized: the listener sees transitions in the
	/// order they were applied. The listener may itself trigger a
	/// transition on the same thread.
	pub fn transition(&self, next: ClientStatus) -> bool {
		let _notify = self.notify.lock();

		let mut previous = next;
		let changed = self.tx.send_if_modified(|current| {
			if current.can_transition_to(next) {
				previous = *current;
				*current = next;
				true
			} else {
				false
			}
		});

		if !changed {
			debug!(
				environment = %self.environment,
				current = %self.current(),
				rejected = %next,
				"Ignoring status transition"
			);
			return false;
		}

		info!(
			environment = %self.environment,
			from = %previous,
			to = %next,
			"Client status changed"
		);

		let listener = self.listener.lock().clone();
		if let Some(listener) = listener {
			listener.on_status_changed(next);
		}
		true
	}

	/// Waits until the status is settled or `timeout` elapses, returning the
	/// status at that point. A zero timeout returns immediately.
	pub async fn wait_settled(&self, timeout: Duration) -> ClientStatus {
		let mut rx = self.tx.subscribe();
		if timeout.is_zero() {
			return *rx.borrow();
		}

		let settled = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_settled())).await;
		match settled {
			Ok(Ok(status)) => *status,
			_ => self.current(),
		}
	}
}
