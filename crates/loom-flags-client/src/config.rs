// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::warn;

use crate::error::{FlagsError, Result};

/// Name under which the primary mobile key is registered.
pub const PRIMARY_ENVIRONMENT: &str = "default";

/// Lower bound for the foreground polling interval.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Lower bound for the background polling interval.
pub const MIN_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Configuration for a flags client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Mobile key of the primary environment.
	pub mobile_key: String,
	/// Additional environments by name. Names must not be `"default"`.
	pub secondary_mobile_keys: BTreeMap<String, String>,
	/// Start without any network activity.
	pub offline: bool,
	/// Interval between polls while in the foreground.
	pub polling_interval: Duration,
	/// Interval between polls while in the background.
	pub background_polling_interval: Duration,
	/// Suspend syncing entirely while in the background.
	pub disable_background_updating: bool,
	/// Maximum number of buffered analytics events.
	pub events_capacity: usize,
	/// Interval between automatic event flushes.
	pub events_flush_interval: Duration,
	/// Base delay for retrying a failed sync.
	pub reconnect_base_delay: Duration,
	/// Maximum delay for retrying a failed sync.
	pub reconnect_max_delay: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			mobile_key: String::new(),
			secondary_mobile_keys: BTreeMap::new(),
			offline: false,
			polling_interval: MIN_POLLING_INTERVAL,
			background_polling_interval: Duration::from_secs(60 * 60),
			disable_background_updating: false,
			events_capacity: 100,
			events_flush_interval: Duration::from_secs(30),
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

impl ClientConfig {
	/// Checks required fields and clamps intervals to their minimums.
	pub fn validated(mut self) -> Result<Self> {
		if self.mobile_key.is_empty() {
			return Err(FlagsError::MissingMobileKey);
		}

		let mut seen = HashSet::from([self.mobile_key.as_str()]);
		for (name, key) in &self.secondary_mobile_keys {
			if name == PRIMARY_ENVIRONMENT {
				return Err(FlagsError::InvalidConfig(format!(
					"secondary environment may not be named '{PRIMARY_ENVIRONMENT}'"
				)));
			}
			if key.is_empty() {
				return Err(FlagsError::InvalidConfig(format!(
					"secondary environment '{name}' has an empty mobile key"
				)));
			}
			if !seen.insert(key.as_str()) {
				return Err(FlagsError::InvalidConfig(format!(
					"secondary environment '{name}' reuses a mobile key"
				)));
			}
		}

		if self.polling_interval < MIN_POLLING_INTERVAL {
			warn!(
				requested_ms = self.polling_interval.as_millis() as u64,
				"Polling interval below minimum, clamping"
			);
			self.polling_interval = MIN_POLLING_INTERVAL;
		}
		if self.background_polling_interval < MIN_BACKGROUND_POLLING_INTERVAL {
			warn!(
				requested_ms = self.background_polling_interval.as_millis() as u64,
				"Background polling interval below minimum, clamping"
			);
			self.background_polling_interval = MIN_BACKGROUND_POLLING_INTERVAL;
		}
		if self.events_capacity == 0 {
			warn!("Event capacity of zero, using 1");
			self.events_capacity = 1;
		}
		if self.reconnect_max_delay < self.reconnect_base_delay {
			self.reconnect_max_delay = self.reconnect_base_delay;
		}

		Ok(self)
	}

	/// Returns the configuration for one environment: the same settings with
	/// `mobile_key` replaced and no secondary keys.
	pub fn for_environment(&self, mobile_key: &str) -> Self {
		Self {
			mobile_key: mobile_key.to_string(),
			secondary_mobile_keys: BTreeMap::new(),
			..self.clone()
		}
	}
}
