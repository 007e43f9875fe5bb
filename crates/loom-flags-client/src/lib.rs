// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side feature flags engine for Loom.
//!
//! The client holds the evaluated flags for one environment in an immutable
//! snapshot. A data source delivers full replacements and incremental
//! updates, each of which installs a new snapshot; evaluation reads the
//! current snapshot without locking and never fails.
//!
//! # Features
//!
//! - **Typed Evaluation**: bool, int, double, string and JSON accessors with
//!   optional evaluation details
//! - **Change Listeners**: per-key callbacks, delivered in install order
//! - **Lifecycle Status**: observable initialization, failure and shutdown
//! - **Connectivity**: offline mode and reduced background syncing
//! - **Persistence**: last known flags restored on startup
//! - **Analytics Events**: evaluation summaries and custom events, batched
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use loom_flags_client::{FileFlagStore, FlagsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .mobile_key("mob-xxx")
//!         .persistence(FileFlagStore::new("/var/lib/app/flags"))
//!         .data_source_factory(my_data_source_factory)
//!         .build()
//!         .await?;
//!
//!     client.wait_for_initialization(Duration::from_secs(5)).await;
//!
//!     let enabled = client.bool_variation("feature.new_flow", false);
//!     let theme = client.str_variation("ui.theme", "light");
//!
//!     client.register_listener("feature.new_flow", |key: &str, _kind| {
//!         println!("{key} changed");
//!     })?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod connectivity;
mod data_source;
mod error;
mod evaluation;
mod events;
mod listeners;
mod persistence;
mod registry;
mod status;
mod store;

pub use client::{FlagsClient, FlagsClientBuilder};
pub use config::{
	ClientConfig, MIN_BACKGROUND_POLLING_INTERVAL, MIN_POLLING_INTERVAL, PRIMARY_ENVIRONMENT,
};
pub use data_source::{
	DataSource, DataSourceFactory, FlagFetcher, NullDataSource, PollingConfig, PollingDataSource,
	SharedDataSource, SharedDataSourceFactory, SyncMode,
};
pub use error::{FlagsError, PersistenceError, Result};
pub use evaluation::{FlagType, SharedString, StringVariation};
pub use events::{
	BatchEventSink, CustomEvent, EvaluationSummary, EventPayload, EventSender, EventSink,
	EventsConfig, FeatureEvaluation, FlagSummary, NoOpEventSink, OutputEvent, SharedEventSink,
	SummaryCounter,
};
pub use listeners::{FlagListener, ListenerId};
pub use persistence::{FileFlagStore, FlagPersistence, MemoryFlagStore, SharedFlagPersistence};
pub use registry::ClientRegistry;
pub use status::{SharedStatusListener, StatusListener};

// Re-export core types for convenience
pub use loom_flags_client_core::{
	ClientStatus, DataSourceEvent, DeleteData, ErrorKind, EvaluationReason, Flag, FlagChange,
	FlagChangeKind, FlagSnapshot, FlagValue, SyncError, SyncErrorKind, ValueKind, VariationDetail,
};
