// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The flags client and its builder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_flags_client_core::{ClientStatus, Flag, FlagSnapshot, FlagValue, VariationDetail};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, PRIMARY_ENVIRONMENT};
use crate::connectivity::{ConnectivityController, SyncTarget};
use crate::data_source::{DataSourceFactory, NullDataSource, SharedDataSourceFactory, SyncMode};
use crate::error::{FlagsError, Result};
use crate::evaluation::{evaluate, evaluate_str, Evaluated, FlagType, StringVariation};
use crate::events::{
	BatchEventSink, CustomEvent, EventSender, EventSink, EventsConfig, FeatureEvaluation,
	NoOpEventSink, SharedEventSink,
};
use crate::listeners::{spawn_dispatcher, FlagListener, ListenerId, ListenerRegistry};
use crate::persistence::{FlagPersistence, SharedFlagPersistence};
use crate::registry::ClientRegistry;
use crate::status::{SharedStatusListener, StatusListener, StatusTracker};
use crate::store::SnapshotStore;

/// Builder for constructing a [`FlagsClient`] or a [`ClientRegistry`].
pub struct FlagsClientBuilder {
	config: ClientConfig,
	data_source_factory: Option<SharedDataSourceFactory>,
	persistence: Option<SharedFlagPersistence>,
	event_sink: Option<SharedEventSink>,
	event_sender: Option<Arc<dyn EventSender>>,
	status_listener: Option<SharedStatusListener>,
}

impl FlagsClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			data_source_factory: None,
			persistence: None,
			event_sink: None,
			event_sender: None,
			status_listener: None,
		}
	}

	/// Replaces the whole configuration.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the mobile key of the primary environment.
	pub fn mobile_key(mut self, key: impl Into<String>) -> Self {
		self.config.mobile_key = key.into();
		self
	}

	/// Adds a secondary environment, served by [`ClientRegistry::get`].
	pub fn secondary_mobile_key(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
		self.config
			.secondary_mobile_keys
			.insert(name.into(), key.into());
		self
	}

	/// Starts the client without network activity.
	pub fn offline(mut self, offline: bool) -> Self {
		self.config.offline = offline;
		self
	}

	/// Sets the foreground polling interval. Values below 30 seconds are raised.
	pub fn polling_interval(mut self, interval: Duration) -> Self {
		self.config.polling_interval = interval;
		self
	}

	/// Sets the background polling interval. Values below 15 minutes are raised.
	pub fn background_polling_interval(mut self, interval: Duration) -> Self {
		self.config.background_polling_interval = interval;
		self
	}

	pub fn disable_background_updating(mut self, disable: bool) -> Self {
		self.config.disable_background_updating = disable;
		self
	}

	pub fn events_capacity(mut self, capacity: usize) -> Self {
		self.config.events_capacity = capacity;
		self
	}

	pub fn events_flush_interval(mut self, interval: Duration) -> Self {
		self.config.events_flush_interval = interval;
		self
	}

	/// Sets the retry backoff bounds used by polling data sources.
	pub fn reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
		self.config.reconnect_base_delay = base;
		self.config.reconnect_max_delay = max;
		self
	}

	/// Sets the factory that creates one data source per environment.
	pub fn data_source_factory(mut self, factory: impl DataSourceFactory + 'static) -> Self {
		self.data_source_factory = Some(Arc::new(factory));
		self
	}

	/// Sets where flags are saved and restored from.
	pub fn persistence(mut self, persistence: impl FlagPersistence + 'static) -> Self {
		self.persistence = Some(Arc::new(persistence));
		self
	}

	/// Sets a sink shared by every environment. Takes precedence over
	/// [`FlagsClientBuilder::event_sender`].
	///
	/// A client built with [`FlagsClientBuilder::build`] owns the sink and
	/// closes it on close. Clients of a registry only flush it; the sink is
	/// closed by [`ClientRegistry::close_all`].
	pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
		self.event_sink = Some(Arc::new(sink));
		self
	}

	/// Buffers events per environment and delivers them through `sender`.
	pub fn event_sender(mut self, sender: impl EventSender + 'static) -> Self {
		self.event_sender = Some(Arc::new(sender));
		self
	}

	/// Sets the status listener registered on every built client.
	pub fn status_listener(mut self, listener: impl StatusListener + 'static) -> Self {
		self.status_listener = Some(Arc::new(listener));
		self
	}

	/// Builds the client for the primary environment.
	///
	/// Flags persisted for the mobile key are restored before syncing
	/// starts. Must be awaited within a tokio runtime.
	pub async fn build(self) -> Result<FlagsClient> {
		let config = self.config.clone().validated()?;
		if !config.secondary_mobile_keys.is_empty() {
			warn!(
				secondary = config.secondary_mobile_keys.len(),
				"Secondary mobile keys are only served by build_registry"
			);
		}
		self.build_environment(PRIMARY_ENVIRONMENT, config.for_environment(&config.mobile_key), true)
			.await
	}

	/// Builds one client per environment: the primary under `"default"`
	/// and each secondary under its configured name.
	pub async fn build_registry(self) -> Result<ClientRegistry> {
		let config = self.config.clone().validated()?;

		let primary = self
			.build_environment(PRIMARY_ENVIRONMENT, config.for_environment(&config.mobile_key), false)
			.await?;

		let mut secondaries = Vec::with_capacity(config.secondary_mobile_keys.len());
		for (name, key) in &config.secondary_mobile_keys {
			match self.build_environment(name, config.for_environment(key), false).await {
				Ok(client) => secondaries.push(client),
				Err(e) => {
					primary.close().await;
					for client in &secondaries {
						client.close().await;
					}
					if let Some(sink) = &self.event_sink {
						sink.close().await;
					}
					return Err(e);
				}
			}
		}

		Ok(ClientRegistry::new(primary, secondaries, self.event_sink.clone()))
	}

	/// `owns_shared_sink` decides whether closing the client also closes a
	/// sink supplied through [`FlagsClientBuilder::event_sink`].
	async fn build_environment(
		&self,
		name: &str,
		config: ClientConfig,
		owns_shared_sink: bool,
	) -> Result<FlagsClient> {
		let runtime = Handle::try_current().map_err(|_| {
			FlagsError::InvalidConfig("flags client must be built within a tokio runtime".to_string())
		})?;

		let (changes_tx, changes_rx) = mpsc::unbounded_channel();
		let store = Arc::new(SnapshotStore::new(name, changes_tx));
		let status = Arc::new(StatusTracker::new(name));
		status.set_listener(self.status_listener.clone());

		let listeners = Arc::new(ListenerRegistry::new());
		let dispatcher = spawn_dispatcher(&runtime, name.to_string(), Arc::clone(&listeners), changes_rx);

		let events: SharedEventSink = match (&self.event_sink, &self.event_sender) {
			(Some(sink), _) => Arc::clone(sink),
			(None, Some(sender)) => Arc::new(BatchEventSink::spawn(
				name,
				EventsConfig::from(&config),
				Arc::clone(sender),
			)),
			(None, None) => Arc::new(NoOpEventSink),
		};
		let owns_events = self.event_sink.is_none() || owns_shared_sink;

		let source = match &self.data_source_factory {
			Some(factory) => factory.create(&config),
			None => {
				debug!(environment = %name, "No data source configured");
				Arc::new(NullDataSource)
			}
		};

		let target = SyncTarget {
			environment: name.to_string(),
			mobile_key: config.mobile_key.clone(),
			store: Arc::clone(&store),
			status: Arc::clone(&status),
			persistence: self.persistence.clone(),
		};
		let connectivity = ConnectivityController::new(
			runtime,
			source,
			target,
			config.offline,
			config.disable_background_updating,
		);

		let client = FlagsClient {
			inner: Arc::new(FlagsClientInner {
				environment: name.to_string(),
				config,
				store,
				status,
				listeners,
				connectivity,
				persistence: self.persistence.clone(),
				events,
				owns_events,
				dispatcher: Mutex::new(Some(dispatcher)),
				closed: AtomicBool::new(false),
			}),
		};

		if client.inner.persistence.is_some() {
			if let Err(e) = client.restore_flags().await {
				error!(environment = %name, error = %e, "Failed to restore persisted flags");
			}
		}

		client.inner.connectivity.start();
		info!(
			environment = %name,
			offline = client.inner.config.offline,
			"Flags client initialized"
		);
		Ok(client)
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FlagsClientInner {
	environment: String,
	config: ClientConfig,
	store: Arc<SnapshotStore>,
	status: Arc<StatusTracker>,
	listeners: Arc<ListenerRegistry>,
	connectivity: ConnectivityController,
	persistence: Option<SharedFlagPersistence>,
	events: SharedEventSink,
	owns_events: bool,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

/// A client serving flags for one environment.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<FlagsClientInner>,
}

impl FlagsClient {
	/// Creates a new builder for configuring the client.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// Name of the environment this client serves.
	pub fn environment(&self) -> &str {
		&self.inner.environment
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	// Lifecycle

	pub fn status(&self) -> ClientStatus {
		self.inner.status.current()
	}

	/// Returns true once a data source sync has succeeded.
	pub fn is_initialized(&self) -> bool {
		self.status() == ClientStatus::Initialized
	}

	/// Waits until the first sync outcome is known, the client shuts down,
	/// or `timeout` elapses. Returns the status reached.
	pub async fn wait_for_initialization(&self, timeout: Duration) -> ClientStatus {
		self.inner.status.wait_settled(timeout).await
	}

	/// Replaces the status listener. Earlier transitions are not replayed.
	pub fn set_status_listener(&self, listener: impl StatusListener + 'static) {
		self.inner.status.set_listener(Some(Arc::new(listener)));
	}

	pub fn clear_status_listener(&self) {
		self.inner.status.set_listener(None);
	}

	/// Shuts the client down: stops syncing, delivers pending listener
	/// notifications and events, then drops all listeners. Idempotent.
	pub async fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		info!(environment = %self.inner.environment, "Closing flags client");
		self.inner.status.transition(ClientStatus::ShuttingDown);

		self.inner.connectivity.shutdown();
		self.inner.store.close_changes();
		let dispatcher = self.inner.dispatcher.lock().take();
		if let Some(dispatcher) = dispatcher {
			if let Err(e) = dispatcher.await {
				error!(environment = %self.inner.environment, error = %e, "Listener dispatcher failed");
			}
		}
		debug!(
			environment = %self.inner.environment,
			listeners = self.inner.listeners.len(),
			"Dropping flag listeners"
		);
		self.inner.listeners.clear();
		if self.inner.owns_events {
			self.inner.events.close().await;
		} else {
			self.inner.events.flush();
		}

		self.inner.status.transition(ClientStatus::Shutdown);
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	// Listeners

	/// Registers a listener for changes to `key`.
	///
	/// Change batches are dispatched asynchronously, so the listener may also
	/// receive a batch that was installed before registration but not yet
	/// delivered, such as the restore performed by [`FlagsClientBuilder::build`].
	pub fn register_listener(
		&self,
		key: &str,
		listener: impl FlagListener + 'static,
	) -> Result<ListenerId> {
		if self.is_closed() {
			return Err(FlagsError::ClientShutdown);
		}
		Ok(self.inner.listeners.register(key, Arc::new(listener)))
	}

	/// Unregisters a listener. Returns false if it was not registered.
	pub fn unregister_listener(&self, key: &str, id: ListenerId) -> bool {
		self.inner.listeners.unregister(key, id)
	}

	// Evaluation

	pub fn bool_variation(&self, key: &str, default: bool) -> bool {
		self.variation_detail(key, default).value
	}

	pub fn bool_variation_detail(&self, key: &str, default: bool) -> VariationDetail<bool> {
		self.variation_detail(key, default)
	}

	/// Evaluates an integer flag. Floating point values are truncated.
	pub fn int_variation(&self, key: &str, default: i64) -> i64 {
		self.variation_detail(key, default).value
	}

	pub fn int_variation_detail(&self, key: &str, default: i64) -> VariationDetail<i64> {
		self.variation_detail(key, default)
	}

	pub fn double_variation(&self, key: &str, default: f64) -> f64 {
		self.variation_detail(key, default).value
	}

	pub fn double_variation_detail(&self, key: &str, default: f64) -> VariationDetail<f64> {
		self.variation_detail(key, default)
	}

	/// Evaluates a string flag into an owned copy.
	pub fn string_variation(&self, key: &str, default: &str) -> String {
		self.variation_detail(key, default.to_string()).value
	}

	pub fn string_variation_detail(&self, key: &str, default: &str) -> VariationDetail<String> {
		self.variation_detail(key, default.to_string())
	}

	/// Evaluates a string flag without copying it. The result borrows
	/// either `default` or the flag record it was read from.
	pub fn str_variation<'a>(&self, key: &str, default: &'a str) -> StringVariation<'a> {
		let snapshot = self.inner.store.load();
		let Evaluated { detail, flag } = evaluate_str(&snapshot, key, default);
		let value = FlagValue::from(detail.value.as_str());
		self.record_evaluation(key, &detail, value, flag.as_deref(), FlagValue::from(default));
		detail.value
	}

	pub fn json_variation(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
		self.variation_detail(key, default).value
	}

	pub fn json_variation_detail(
		&self,
		key: &str,
		default: serde_json::Value,
	) -> VariationDetail<serde_json::Value> {
		self.variation_detail(key, default)
	}

	/// Evaluates `key` as any supported type.
	pub fn variation_detail<T: FlagType>(&self, key: &str, default: T) -> VariationDetail<T> {
		let snapshot = self.inner.store.load();
		let default_value = default.to_flag_value();
		let Evaluated { detail, flag } = evaluate(&snapshot, key, default);
		let value = detail.value.to_flag_value();
		self.record_evaluation(key, &detail, value, flag.as_deref(), default_value);
		detail
	}

	/// Copies out every flag key with its value.
	pub fn all_flags(&self) -> HashMap<String, FlagValue> {
		self.inner.store.load().values()
	}

	fn record_evaluation<T>(
		&self,
		key: &str,
		detail: &VariationDetail<T>,
		value: FlagValue,
		flag: Option<&Flag>,
		default: FlagValue,
	) {
		self.inner.events.record_evaluation(FeatureEvaluation {
			key: key.to_string(),
			value,
			default,
			variation: detail.variation_index,
			version: flag.map(|f| f.flag_version.unwrap_or(f.version)),
			reason: detail.reason.clone(),
			track_events: flag.is_some_and(|f| f.track_events),
			creation_date: Utc::now(),
		});
	}

	// Connectivity

	pub fn set_online(&self) {
		self.inner.connectivity.set_online();
	}

	/// Stops syncing. Evaluation keeps serving the installed flags.
	pub fn set_offline(&self) {
		self.inner.connectivity.set_offline();
	}

	pub fn is_offline(&self) -> bool {
		self.inner.connectivity.is_offline()
	}

	/// Switches to background syncing, or suspends syncing when background
	/// updating is disabled.
	pub fn set_background(&self, background: bool) {
		self.inner.connectivity.set_background(background);
	}

	pub fn is_background(&self) -> bool {
		self.inner.connectivity.is_background()
	}

	/// Mode of the running sync, or `None` when not syncing.
	pub fn sync_mode(&self) -> Option<SyncMode> {
		self.inner.connectivity.sync_mode()
	}

	// Persistence

	/// Serializes the installed flags as a JSON object of key to flag.
	pub fn serialize_flags(&self) -> Result<String> {
		Ok(self.inner.store.load().to_json_string()?)
	}

	/// Saves the installed flags to the configured persistence.
	pub async fn save_flags(&self) -> Result<()> {
		let persistence = self.require_persistence()?;
		let data = self.serialize_flags()?;
		persistence.save(&self.inner.config.mobile_key, &data).await?;
		debug!(environment = %self.inner.environment, "Saved flags");
		Ok(())
	}

	/// Restores flags from the configured persistence. Returns true if a
	/// snapshot was installed; false if nothing was stored or a data source
	/// snapshot is already installed.
	pub async fn restore_flags(&self) -> Result<bool> {
		let persistence = self.require_persistence()?;
		let Some(data) = persistence.load(&self.inner.config.mobile_key).await? else {
			debug!(environment = %self.inner.environment, "No persisted flags");
			return Ok(false);
		};
		self.install_restored(&data)
	}

	/// Restores flags from text produced by [`FlagsClient::serialize_flags`],
	/// and saves it to the configured persistence when installed.
	pub async fn restore_flags_from_str(&self, data: &str) -> Result<bool> {
		let installed = self.install_restored(data)?;
		if installed {
			if let Some(persistence) = &self.inner.persistence {
				if let Err(e) = persistence.save(&self.inner.config.mobile_key, data).await {
					error!(environment = %self.inner.environment, error = %e, "Failed to persist restored flags");
				}
			}
		}
		Ok(installed)
	}

	fn install_restored(&self, data: &str) -> Result<bool> {
		let flags = FlagSnapshot::parse_flags(data)?;
		let count = flags.len();
		let installed = self.inner.store.restore(flags).is_some();
		if installed {
			info!(environment = %self.inner.environment, flags = count, "Restored persisted flags");
		}
		Ok(installed)
	}

	fn require_persistence(&self) -> Result<&SharedFlagPersistence> {
		self.inner
			.persistence
			.as_ref()
			.ok_or_else(|| FlagsError::InvalidConfig("no persistence configured".to_string()))
	}

	// Events

	/// Records a custom event.
	pub fn track(&self, key: &str) {
		self.inner.events.track(CustomEvent::new(key));
	}

	pub fn track_data(&self, key: &str, data: serde_json::Value) {
		self.inner.events.track(CustomEvent::new(key).with_data(data));
	}

	pub fn track_metric(&self, key: &str, data: Option<serde_json::Value>, metric: f64) {
		let mut event = CustomEvent::new(key).with_metric(metric);
		event.data = data;
		self.inner.events.track(event);
	}

	/// Requests delivery of buffered events without waiting for it.
	pub fn flush(&self) {
		self.inner.events.flush();
	}
}

impl std::fmt::Debug for FlagsClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsClient")
			.field("environment", &self.inner.environment)
			.field("status", &self.status())
			.field("offline", &self.is_offline())
			.finish()
	}
}
