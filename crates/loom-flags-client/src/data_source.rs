// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Data sources deliver flag updates to a client.
//!
//! A [`DataSource`] runs on a task owned by the client and reports through
//! an event channel. The client aborts the task to go offline or to switch
//! between foreground and background syncing, so implementations hold no
//! state that must survive cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_flags_client_core::{DataSourceEvent, Flag, SyncError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

/// How actively a data source should sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
	Foreground,
	/// Reduced activity while the host application is in the background.
	Background,
}

/// Produces flag updates for one environment.
#[async_trait]
pub trait DataSource: Send + Sync {
	/// Syncs until `events` is closed or the task is aborted.
	async fn run(&self, mode: SyncMode, events: mpsc::Sender<DataSourceEvent>);
}

/// Shared data source handle.
pub type SharedDataSource = Arc<dyn DataSource>;

/// Creates the data source for an environment.
pub trait DataSourceFactory: Send + Sync {
	fn create(&self, config: &ClientConfig) -> SharedDataSource;
}

impl<F> DataSourceFactory for F
where
	F: Fn(&ClientConfig) -> SharedDataSource + Send + Sync,
{
	fn create(&self, config: &ClientConfig) -> SharedDataSource {
		self(config)
	}
}

/// Shared factory handle.
pub type SharedDataSourceFactory = Arc<dyn DataSourceFactory>;

/// A data source that never delivers anything. Used when no factory is
/// configured; the client then relies on persisted flags alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDataSource;

#[async_trait]
impl DataSource for NullDataSource {
	async fn run(&self, _mode: SyncMode, events: mpsc::Sender<DataSourceEvent>) {
		events.closed().await;
	}
}

/// Fetches the complete evaluated flag set.
#[async_trait]
pub trait FlagFetcher: Send + Sync {
	async fn fetch(&self, mode: SyncMode) -> std::result::Result<Vec<Flag>, SyncError>;
}

/// Configuration for [`PollingDataSource`].
#[derive(Debug, Clone)]
pub struct PollingConfig {
	pub interval: Duration,
	pub background_interval: Duration,
	/// Base delay for retrying after a failure.
	pub retry_base_delay: Duration,
	/// Maximum delay for retrying after a failure.
	pub retry_max_delay: Duration,
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self::from(&ClientConfig::default())
	}
}

impl From<&ClientConfig> for PollingConfig {
	fn from(config: &ClientConfig) -> Self {
		Self {
			interval: config.polling_interval,
			background_interval: config.background_polling_interval,
			retry_base_delay: config.reconnect_base_delay,
			retry_max_delay: config.reconnect_max_delay,
		}
	}
}

impl PollingConfig {
	pub fn interval_for(&self, mode: SyncMode) -> Duration {
		match mode {
			SyncMode::Foreground => self.interval,
			SyncMode::Background => self.background_interval,
		}
	}
}

/// Polls a [`FlagFetcher`], emitting a full replacement on every success.
///
/// Failures are reported and retried with exponential backoff. A failure
/// that cannot succeed on retry (for example rejected credentials) stops
/// polling.
pub struct PollingDataSource<F> {
	fetcher: F,
	config: PollingConfig,
}

impl<F: FlagFetcher> PollingDataSource<F> {
	pub fn new(fetcher: F, config: PollingConfig) -> Self {
		Self { fetcher, config }
	}
}

#[async_trait]
impl<F: FlagFetcher> DataSource for PollingDataSource<F> {
	async fn run(&self, mode: SyncMode, events: mpsc::Sender<DataSourceEvent>) {
		let mut consecutive_failures: u32 = 0;
		info!(mode = ?mode, "Starting flag polling");

		loop {
			let delay = match self.fetcher.fetch(mode).await {
				Ok(flags) => {
					consecutive_failures = 0;
					debug!(flags = flags.len(), "Fetched flags");
					if events.send(DataSourceEvent::Put(flags)).await.is_err() {
						break;
					}
					self.config.interval_for(mode)
				}
				Err(e) => {
					consecutive_failures = consecutive_failures.saturating_add(1);
					let retryable = e.is_retryable();
					warn!(error = %e, attempts = consecutive_failures, "Flag fetch failed");
					if events.send(DataSourceEvent::Failed(e)).await.is_err() {
						break;
					}
					if !retryable {
						warn!("Flag fetch failure is permanent, stopping polling");
						break;
					}
					backoff_delay(&self.config, consecutive_failures)
				}
			};

			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = events.closed() => break,
			}
		}

		debug!("Flag polling stopped");
	}
}

/// Exponential backoff with up to 10% jitter, capped at the max delay.
pub(crate) fn backoff_delay(config: &PollingConfig, failures: u32) -> Duration {
	let exponent = failures.saturating_sub(1).min(10);
	let factor = 2u64.saturating_pow(exponent);
	let base_ms = config.retry_base_delay.as_millis() as u64;
	let max_ms = config.retry_max_delay.as_millis() as u64;
	let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
	let jitter_ms = fastrand::u64(0..=delay_ms / 10);
	Duration::from_millis(delay_ms.saturating_sub(jitter_ms))
}
