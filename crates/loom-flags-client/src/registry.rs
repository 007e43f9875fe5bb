// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Clients for several environments built from one configuration.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::info;

use crate::client::FlagsClient;
use crate::config::PRIMARY_ENVIRONMENT;
use crate::error::{FlagsError, Result};
use crate::events::SharedEventSink;

/// One client per environment. Each environment has its own snapshot,
/// status and sync; only the configuration and an optional event sink are
/// shared.
#[derive(Clone)]
pub struct ClientRegistry {
	primary: FlagsClient,
	secondaries: BTreeMap<String, FlagsClient>,
	shared_events: Option<SharedEventSink>,
}

impl ClientRegistry {
	pub(crate) fn new(
		primary: FlagsClient,
		secondaries: Vec<FlagsClient>,
		shared_events: Option<SharedEventSink>,
	) -> Self {
		let secondaries = secondaries
			.into_iter()
			.map(|client| (client.environment().to_string(), client))
			.collect();
		Self {
			primary,
			secondaries,
			shared_events,
		}
	}

	/// The client for the primary mobile key.
	pub fn primary(&self) -> &FlagsClient {
		&self.primary
	}

	/// Looks up a client by environment name. `"default"` is the primary.
	pub fn get(&self, name: &str) -> Option<&FlagsClient> {
		if name == PRIMARY_ENVIRONMENT {
			Some(&self.primary)
		} else {
			self.secondaries.get(name)
		}
	}

	/// Like [`ClientRegistry::get`], failing for unknown names.
	pub fn require(&self, name: &str) -> Result<&FlagsClient> {
		self.get(name)
			.ok_or_else(|| FlagsError::UnknownEnvironment(name.to_string()))
	}

	/// Environment names, primary first.
	pub fn names(&self) -> Vec<&str> {
		std::iter::once(PRIMARY_ENVIRONMENT)
			.chain(self.secondaries.keys().map(String::as_str))
			.collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &FlagsClient> {
		std::iter::once(&self.primary).chain(self.secondaries.values())
	}

	pub fn len(&self) -> usize {
		1 + self.secondaries.len()
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	pub fn set_online_all(&self) {
		self.iter().for_each(FlagsClient::set_online);
	}

	pub fn set_offline_all(&self) {
		self.iter().for_each(FlagsClient::set_offline);
	}

	pub fn set_background_all(&self, background: bool) {
		for client in self.iter() {
			client.set_background(background);
		}
	}

	pub fn flush_all(&self) {
		self.iter().for_each(FlagsClient::flush);
	}

	/// Closes every client concurrently, then the shared event sink.
	pub async fn close_all(&self) {
		info!(environments = self.len(), "Closing all flags clients");
		join_all(self.iter().map(FlagsClient::close)).await;
		if let Some(sink) = &self.shared_events {
			sink.close().await;
		}
	}
}

impl std::fmt::Debug for ClientRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientRegistry")
			.field("primary", &self.primary)
			.field("secondaries", &self.secondaries)
			.field("shared_events", &self.shared_events.is_some())
			.finish()
	}
}
