// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Analytics events produced by evaluations and custom tracking.
//!
//! The client reports every evaluation and every `track` call to an
//! [`EventSink`]. Recording never blocks the caller. [`BatchEventSink`]
//! buffers events on a background task and hands them to an
//! [`EventSender`] on an interval, on explicit flush, and on close.
//!
//! # Payload
//!
//! | Field | Contents |
//! |-------|----------|
//! | `events` | Custom events and full feature events, oldest first |
//! | `summary` | Per-flag evaluation counters since the previous payload |
//!
//! Only flags with `trackEvents` set produce full feature events; every
//! evaluation is counted in the summary. Counting happens on the calling
//! thread, so a full event queue never loses summary counts.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_flags_client_core::{EvaluationReason, FlagValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::Result;

/// A single flag evaluation as reported to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluation {
	pub key: String,
	pub value: FlagValue,
	pub default: FlagValue,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub variation: Option<u32>,
	/// Version of the evaluated record; `None` when the flag was not found.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<EvaluationReason>,
	#[serde(skip)]
	pub track_events: bool,
	pub creation_date: DateTime<Utc>,
}

/// A custom event recorded with `track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
	pub key: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metric_value: Option<f64>,
	pub creation_date: DateTime<Utc>,
}

impl CustomEvent {
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			data: None,
			metric_value: None,
			creation_date: Utc::now(),
		}
	}

	pub fn with_data(mut self, data: serde_json::Value) -> Self {
		self.data = Some(data);
		self
	}

	pub fn with_metric(mut self, metric: f64) -> Self {
		self.metric_value = Some(metric);
		self
	}
}

/// Receives evaluations and custom events from a client.
///
/// `record_evaluation`, `track` and `flush` must return without waiting
/// on I/O.
#[async_trait]
pub trait EventSink: Send + Sync {
	fn record_evaluation(&self, evaluation: FeatureEvaluation);

	fn track(&self, event: CustomEvent);

	/// Requests delivery of everything buffered so far.
	fn flush(&self);

	/// Delivers remaining events and stops accepting new ones. Idempotent.
	async fn close(&self);
}

/// Shared event sink handle.
pub type SharedEventSink = Arc<dyn EventSink>;

/// An event sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
	fn record_evaluation(&self, _evaluation: FeatureEvaluation) {}

	fn track(&self, _event: CustomEvent) {}

	fn flush(&self) {}

	async fn close(&self) {}
}

/// An entry in a payload's event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputEvent {
	Feature(FeatureEvaluation),
	Custom(CustomEvent),
}

/// Evaluation counters for one flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSummary {
	pub default: FlagValue,
	pub counters: Vec<SummaryCounter>,
}

/// Number of evaluations that produced one (variation, version) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCounter {
	pub value: FlagValue,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub variation: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<u64>,
	/// Set when the flag was not found.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub unknown: bool,
	pub count: u64,
}

/// Summary of all evaluations in a flush window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
	pub start_date: DateTime<Utc>,
	pub end_date: DateTime<Utc>,
	pub features: BTreeMap<String, FlagSummary>,
}

/// A batch handed to an [`EventSender`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
	pub events: Vec<OutputEvent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub summary: Option<EvaluationSummary>,
}

impl EventPayload {
	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.summary.is_none()
	}
}

/// Delivers event payloads, typically to an analytics endpoint.
#[async_trait]
pub trait EventSender: Send + Sync {
	async fn send(&self, environment: &str, payload: EventPayload) -> Result<()>;
}

/// Configuration for a [`BatchEventSink`].
#[derive(Debug, Clone)]
pub struct EventsConfig {
	/// Maximum number of buffered events before dropping the oldest.
	pub capacity: usize,
	/// Interval between automatic flushes.
	pub flush_interval: Duration,
}

impl Default for EventsConfig {
	fn default() -> Self {
		Self {
			capacity: 100,
			flush_interval: Duration::from_secs(30),
		}
	}
}

impl From<&ClientConfig> for EventsConfig {
	fn from(config: &ClientConfig) -> Self {
		Self {
			capacity: config.events_capacity.max(1),
			flush_interval: config.events_flush_interval,
		}
	}
}

#[derive(Debug)]
enum EventCommand {
	Feature(FeatureEvaluation),
	Custom(CustomEvent),
	Flush,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CounterKey {
	variation: Option<u32>,
	version: Option<u64>,
}

#[derive(Debug)]
struct FlagCounters {
	default: FlagValue,
	counters: BTreeMap<CounterKey, (FlagValue, u64)>,
}

/// Per-flag evaluation counters for the current flush window. Updated on
/// the evaluating thread so no evaluation is lost to queue pressure.
#[derive(Debug, Default)]
struct SummaryCounters {
	features: BTreeMap<String, FlagCounters>,
	window_start: Option<DateTime<Utc>>,
}

impl SummaryCounters {
	fn count(&mut self, evaluation: &FeatureEvaluation) {
		self.window_start.get_or_insert(evaluation.creation_date);

		if !self.features.contains_key(&evaluation.key) {
			self.features.insert(
				evaluation.key.clone(),
				FlagCounters {
					default: evaluation.default.clone(),
					counters: BTreeMap::new(),
				},
			);
		}
		let Some(flag) = self.features.get_mut(&evaluation.key) else {
			return;
		};
		let key = CounterKey {
			variation: evaluation.variation,
			version: evaluation.version,
		};
		flag.counters
			.entry(key)
			.or_insert_with(|| (evaluation.value.clone(), 0))
			.1 += 1;
	}

	fn take(&mut self) -> Option<EvaluationSummary> {
		let start_date = self.window_start.take()?;
		let features = std::mem::take(&mut self.features)
			.into_iter()
			.map(|(key, flag)| {
				let counters = flag
					.counters
					.into_iter()
					.map(|(k, (value, count))| SummaryCounter {
						value,
						variation: k.variation,
						version: k.version,
						unknown: k.version.is_none(),
						count,
					})
					.collect();
				(
					key,
					FlagSummary {
						default: flag.default,
						counters,
					},
				)
			})
			.collect();
		Some(EvaluationSummary {
			start_date,
			end_date: Utc::now(),
			features,
		})
	}
}

type SharedCounters = Arc<Mutex<SummaryCounters>>;

/// Events accumulated between flushes, plus a handle on the counters.
#[derive(Debug)]
struct EventBuffer {
	environment: String,
	capacity: usize,
	events: VecDeque<OutputEvent>,
	summary: SharedCounters,
}

impl EventBuffer {
	fn new(environment: String, capacity: usize, summary: SharedCounters) -> Self {
		Self {
			environment,
			capacity,
			events: VecDeque::new(),
			summary,
		}
	}

	fn push_event(&mut self, event: OutputEvent) {
		while self.events.len() >= self.capacity {
			if let Some(dropped) = self.events.pop_front() {
				let key = match &dropped {
					OutputEvent::Feature(e) => &e.key,
					OutputEvent::Custom(e) => &e.key,
				};
				warn!(
					environment = %self.environment,
					event_key = %key,
					"Dropped event due to queue overflow"
				);
			}
		}
		self.events.push_back(event);
	}

	fn take_payload(&mut self) -> EventPayload {
		let events = self.events.drain(..).collect();
		let summary = self.summary.lock().take();
		EventPayload { events, summary }
	}
}

/// Buffers events on a background task and delivers them in batches.
pub struct BatchEventSink {
	environment: String,
	summary: SharedCounters,
	tx: mpsc::Sender<EventCommand>,
	task: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

impl BatchEventSink {
	/// Starts the background task on the current tokio runtime.
	pub fn spawn(
		environment: impl Into<String>,
		config: EventsConfig,
		sender: Arc<dyn EventSender>,
	) -> Self {
		let environment = environment.into();
		let capacity = config.capacity.max(1);
		let (tx, rx) = mpsc::channel(capacity.max(16));

		let summary = SharedCounters::default();
		let buffer = EventBuffer::new(environment.clone(), capacity, Arc::clone(&summary));
		let task = tokio::spawn(run_event_loop(buffer, config.flush_interval, sender, rx));

		Self {
			environment,
			summary,
			tx,
			task: Mutex::new(Some(task)),
			closed: AtomicBool::new(false),
		}
	}

	fn submit(&self, command: EventCommand) {
		if self.closed.load(Ordering::SeqCst) {
			return;
		}
		match self.tx.try_send(command) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(command)) => {
				warn!(
					environment = %self.environment,
					command = ?command,
					"Event queue full, dropping"
				);
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!(environment = %self.environment, "Event processor stopped");
			}
		}
	}
}

#[async_trait]
impl EventSink for BatchEventSink {
	fn record_evaluation(&self, evaluation: FeatureEvaluation) {
		if self.closed.load(Ordering::SeqCst) {
			return;
		}
		self.summary.lock().count(&evaluation);
		if evaluation.track_events {
			self.submit(EventCommand::Feature(evaluation));
		}
	}

	fn track(&self, event: CustomEvent) {
		self.submit(EventCommand::Custom(event));
	}

	fn flush(&self) {
		self.submit(EventCommand::Flush);
	}

	async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = self.tx.send(EventCommand::Shutdown).await;
		let task = self.task.lock().take();
		if let Some(task) = task {
			let _ = task.await;
		}
	}
}

impl Drop for BatchEventSink {
	fn drop(&mut self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
		}
	}
}

async fn run_event_loop(
	mut buffer: EventBuffer,
	flush_interval: Duration,
	sender: Arc<dyn EventSender>,
	mut rx: mpsc::Receiver<EventCommand>,
) {
	info!(
		environment = %buffer.environment,
		flush_interval_secs = flush_interval.as_secs(),
		capacity = buffer.capacity,
		"Starting event processor"
	);

	let start = tokio::time::Instant::now() + flush_interval;
	let mut ticker = tokio::time::interval_at(start, flush_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				deliver(&mut buffer, sender.as_ref()).await;
			}
			command = rx.recv() => {
				match command {
					Some(EventCommand::Feature(evaluation)) => {
						buffer.push_event(OutputEvent::Feature(evaluation))
					}
					Some(EventCommand::Custom(event)) => buffer.push_event(OutputEvent::Custom(event)),
					Some(EventCommand::Flush) => deliver(&mut buffer, sender.as_ref()).await,
					Some(EventCommand::Shutdown) | None => {
						deliver(&mut buffer, sender.as_ref()).await;
						break;
					}
				}
			}
		}
	}

	info!(environment = %buffer.environment, "Event processor stopped");
}

async fn deliver(buffer: &mut EventBuffer, sender: &dyn EventSender) {
	let payload = buffer.take_payload();
	if payload.is_empty() {
		return;
	}

	debug!(
		environment = %buffer.environment,
		events = payload.events.len(),
		summarized = payload.summary.as_ref().map_or(0, |s| s.features.len()),
		"Flushing events"
	);
	if let Err(e) = sender.send(&buffer.environment, payload).await {
		error!(environment = %buffer.environment, error = %e, "Failed to deliver events");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::FlagsError;

	#[derive(Default)]
	struct RecordingSender {
		payloads: Mutex<Vec<EventPayload>>,
	}

	#[async_trait]
	impl EventSender for RecordingSender {
		async fn send(&self, _environment: &str, payload: EventPayload) -> Result<()> {
			self.payloads.lock().push(payload);
			Ok(())
		}
	}

	fn evaluation(key: &str, value: FlagValue, variation: Option<u32>, track: bool) -> FeatureEvaluation {
		FeatureEvaluation {
			key: key.to_string(),
			value,
			default: FlagValue::Bool(false),
			variation,
			version: variation.map(|_| 3),
			reason: None,
			track_events: track,
			creation_date: Utc::now(),
		}
	}

	fn buffer(capacity: usize) -> EventBuffer {
		EventBuffer::new("default".to_string(), capacity, SharedCounters::default())
	}

	#[test]
	fn test_summary_counts_by_variation() {
		let mut buffer = buffer(10);
		{
			let mut summary = buffer.summary.lock();
			summary.count(&evaluation("a", FlagValue::Bool(true), Some(0), false));
			summary.count(&evaluation("a", FlagValue::Bool(true), Some(0), false));
			summary.count(&evaluation("a", FlagValue::Bool(false), Some(1), false));
			summary.count(&evaluation("missing", FlagValue::Bool(false), None, false));
		}

		let payload = buffer.take_payload();
		assert!(payload.events.is_empty());

		let summary = payload.summary.unwrap();
		let a = &summary.features["a"];
		assert_eq!(a.counters.len(), 2);
		assert_eq!(a.counters[0].count, 2);
		assert_eq!(a.counters[0].variation, Some(0));

		let missing = &summary.features["missing"];
		assert!(missing.counters[0].unknown);

		assert!(buffer.take_payload().is_empty());
	}

	#[test]
	fn test_events_keep_arrival_order() {
		let mut buffer = buffer(10);
		buffer.push_event(OutputEvent::Feature(evaluation(
			"a",
			FlagValue::Bool(true),
			Some(0),
			true,
		)));
		buffer.push_event(OutputEvent::Custom(CustomEvent::new("clicked").with_metric(2.0)));

		let payload = buffer.take_payload();
		assert_eq!(payload.events.len(), 2);
		assert!(matches!(payload.events[0], OutputEvent::Feature(_)));
		assert!(matches!(payload.events[1], OutputEvent::Custom(_)));
		assert!(payload.summary.is_none());
	}

	#[test]
	fn test_overflow_drops_oldest() {
		let mut buffer = buffer(2);
		for key in ["one", "two", "three"] {
			buffer.push_event(OutputEvent::Custom(CustomEvent::new(key)));
		}
		let keys: Vec<_> = buffer
			.take_payload()
			.events
			.into_iter()
			.map(|e| match e {
				OutputEvent::Custom(c) => c.key,
				OutputEvent::Feature(f) => f.key,
			})
			.collect();
		assert_eq!(keys, vec!["two", "three"]);
	}

	#[tokio::test]
	async fn test_burst_of_evaluations_is_fully_counted() {
		let sender = Arc::new(RecordingSender::default());
		let sink = BatchEventSink::spawn(
			"default",
			EventsConfig {
				capacity: 100,
				flush_interval: Duration::from_secs(3600),
			},
			sender.clone(),
		);

		for i in 0..1000u32 {
			let variation = Some(i % 2);
			sink.record_evaluation(evaluation("hot", FlagValue::Bool(i % 2 == 0), variation, false));
		}
		for _ in 0..300 {
			sink.record_evaluation(evaluation("tracked", FlagValue::Bool(true), Some(0), true));
		}
		sink.close().await;

		let payloads = sender.payloads.lock();
		let counted = |key: &str| -> u64 {
			payloads
				.iter()
				.filter_map(|p| p.summary.as_ref())
				.filter_map(|s| s.features.get(key))
				.flat_map(|f| f.counters.iter())
				.map(|c| c.count)
				.sum()
		};
		assert_eq!(counted("hot"), 1000);
		assert_eq!(counted("tracked"), 300);
		let feature_events: usize = payloads
			.iter()
			.flat_map(|p| p.events.iter())
			.filter(|e| matches!(e, OutputEvent::Feature(_)))
			.count();
		assert!(feature_events <= 300);
	}

	#[test]
	fn test_payload_wire_shape() {
		let event = OutputEvent::Custom(CustomEvent::new("purchase").with_data(serde_json::json!({"sku": 1})));
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["kind"], "custom");
		assert_eq!(json["key"], "purchase");
		assert_eq!(json["data"]["sku"], 1);
		assert!(json.get("metricValue").is_none());
	}

	#[tokio::test]
	async fn test_flush_and_close_deliver() {
		let sender = Arc::new(RecordingSender::default());
		let sink = BatchEventSink::spawn(
			"default",
			EventsConfig {
				capacity: 10,
				flush_interval: Duration::from_secs(3600),
			},
			sender.clone(),
		);

		sink.track(CustomEvent::new("first"));
		sink.flush();
		sink.track(CustomEvent::new("second"));
		sink.close().await;

		let payloads = sender.payloads.lock();
		assert_eq!(payloads.len(), 2);
		assert_eq!(payloads[0].events.len(), 1);
		assert_eq!(payloads[1].events.len(), 1);

		drop(payloads);
		sink.track(CustomEvent::new("after-close"));
		sink.close().await;
		assert_eq!(sender.payloads.lock().len(), 2);
	}

	struct FlakySender {
		failures: Mutex<u32>,
		delivered: RecordingSender,
	}

	#[async_trait]
	impl EventSender for FlakySender {
		async fn send(&self, environment: &str, payload: EventPayload) -> Result<()> {
			{
				let mut failures = self.failures.lock();
				if *failures > 0 {
					*failures -= 1;
					return Err(FlagsError::EventDelivery("collector unavailable".to_string()));
				}
			}
			self.delivered.send(environment, payload).await
		}
	}

	#[tokio::test]
	async fn test_delivery_failure_does_not_stop_processor() {
		let sender = Arc::new(FlakySender {
			failures: Mutex::new(1),
			delivered: RecordingSender::default(),
		});
		let sink = BatchEventSink::spawn(
			"default",
			EventsConfig {
				capacity: 10,
				flush_interval: Duration::from_secs(3600),
			},
			sender.clone(),
		);

		sink.track(CustomEvent::new("lost"));
		sink.flush();
		sink.track(CustomEvent::new("kept"));
		sink.close().await;

		let payloads = sender.delivered.payloads.lock();
		assert_eq!(payloads.len(), 1);
		assert!(matches!(&payloads[0].events[0], OutputEvent::Custom(c) if c.key == "kept"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_flush() {
		let sender = Arc::new(RecordingSender::default());
		let sink = BatchEventSink::spawn(
			"default",
			EventsConfig {
				capacity: 10,
				flush_interval: Duration::from_secs(30),
			},
			sender.clone(),
		);

		sink.track(CustomEvent::new("tick"));
		tokio::time::sleep(Duration::from_secs(31)).await;
		assert_eq!(sender.payloads.lock().len(), 1);

		sink.close().await;
	}
}
