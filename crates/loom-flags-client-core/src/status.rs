// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a client instance.
///
/// Transitions only move forward along
/// `Initializing -> Failed -> Initialized -> ShuttingDown -> Shutdown`,
/// skipping steps as needed. `Failed` can still become `Initialized` when a
/// later sync succeeds; `Initialized` never falls back to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
	Initializing,
	Initialized,
	Failed,
	ShuttingDown,
	Shutdown,
}

impl ClientStatus {
	fn rank(self) -> u8 {
		match self {
			ClientStatus::Initializing => 0,
			ClientStatus::Failed => 1,
			ClientStatus::Initialized => 2,
			ClientStatus::ShuttingDown => 3,
			ClientStatus::Shutdown => 4,
		}
	}

	/// Returns true if moving from `self` to `next` is a legal transition.
	pub fn can_transition_to(self, next: ClientStatus) -> bool {
		next.rank() > self.rank()
	}

	/// Returns true once the first sync outcome (or shutdown) is known.
	/// `ShuttingDown` is not settled: waiters are released on `Shutdown`.
	pub fn is_settled(self) -> bool {
		matches!(
			self,
			ClientStatus::Initialized | ClientStatus::Failed | ClientStatus::Shutdown
		)
	}

	/// Returns true for `ShuttingDown` and `Shutdown`.
	pub fn is_closing(self) -> bool {
		matches!(self, ClientStatus::ShuttingDown | ClientStatus::Shutdown)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ClientStatus::Initializing => "initializing",
			ClientStatus::Initialized => "initialized",
			ClientStatus::Failed => "failed",
			ClientStatus::ShuttingDown => "shutting_down",
			ClientStatus::Shutdown => "shutdown",
		}
	}
}

impl fmt::Display for ClientStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
