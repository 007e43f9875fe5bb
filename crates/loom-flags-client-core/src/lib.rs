// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom client-side feature flags engine.
//!
//! This crate holds the data model shared by the engine (`loom-flags-client`)
//! and by data source and persistence implementations. It performs no I/O
//! and has no async runtime dependency.
//!
//! # Overview
//!
//! - [`Flag`] and [`FlagValue`]: an already-evaluated flag as served to the client
//! - [`FlagSnapshot`]: an immutable set of flags and the [`FlagChange`]s between two sets
//! - [`DataSourceEvent`]: full replacements and versioned incremental updates
//! - [`EvaluationReason`], [`ErrorKind`] and [`VariationDetail`]: evaluation results
//! - [`ClientStatus`]: the forward-only client lifecycle
//!
//! # Example
//!
//! ```
//! use loom_flags_client_core::{Flag, FlagChangeKind, FlagSnapshot, SnapshotOrigin};
//!
//! let before = FlagSnapshot::from_flags(1, SnapshotOrigin::DataSource, vec![Flag::new("flag-a", true)]);
//! let after = FlagSnapshot::from_flags(2, SnapshotOrigin::DataSource, vec![Flag::new("flag-a", false)]);
//!
//! let changes = before.diff(&after);
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].kind, FlagChangeKind::Updated);
//! ```

pub mod error;
pub mod evaluation;
pub mod event;
pub mod flag;
pub mod snapshot;
pub mod status;

pub use error::{FlagsCoreError, Result};
pub use evaluation::{ErrorKind, EvaluationReason, VariationDetail};
pub use event::{DataSourceEvent, DeleteData, SyncError, SyncErrorKind};
pub use flag::{Flag, FlagValue, ValueKind};
pub use snapshot::{FlagChange, FlagChangeKind, FlagSnapshot, SnapshotOrigin};
pub use status::ClientStatus;
