// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Updates delivered by a data source.
//!
//! # Events
//!
//! - `put` - Full replacement of the flag set
//! - `patch` - Upsert of a single flag, ordered by version
//! - `delete` - Removal of a single flag, ordered by version
//!
//! Failures are reported as [`DataSourceEvent::Failed`], which never
//! appears on the wire.
//!
//! # Example
//!
//! ```
//! use loom_flags_client_core::DataSourceEvent;
//!
//! let event = DataSourceEvent::parse("patch", r#"{"key":"flag-a","value":true,"version":4}"#).unwrap();
//! assert_eq!(event.event_type(), "patch");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FlagsCoreError, Result};
use crate::flag::Flag;
use crate::snapshot::parse_flag_map;

/// A single update from a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum DataSourceEvent {
	/// Replace the whole flag set.
	Put(Vec<Flag>),
	/// Insert or replace one flag if its version is not older.
	Patch(Flag),
	/// Tombstone one flag if the version is not older.
	Delete(DeleteData),
	/// The source could not deliver data.
	#[serde(skip)]
	Failed(SyncError),
}

impl DataSourceEvent {
	/// Returns the event type name as a string.
	pub fn event_type(&self) -> &'static str {
		match self {
			DataSourceEvent::Put(_) => "put",
			DataSourceEvent::Patch(_) => "patch",
			DataSourceEvent::Delete(_) => "delete",
			DataSourceEvent::Failed(_) => "failed",
		}
	}

	pub fn delete(key: impl Into<String>, version: u64) -> Self {
		DataSourceEvent::Delete(DeleteData {
			key: key.into(),
			version,
		})
	}

	/// Decodes a named stream event.
	///
	/// `put` data is a JSON object of key to flag; `patch` data is a single
	/// flag carrying its key; `delete` data is `{"key", "version"}`.
	pub fn parse(event: &str, data: &str) -> Result<Self> {
		match event {
			"put" => Ok(DataSourceEvent::Put(parse_flag_map(data)?)),
			"patch" => {
				let flag: Flag = serde_json::from_str(data)?;
				if flag.key.is_empty() {
					return Err(FlagsCoreError::InvalidPayload(
						"patch is missing a flag key".to_string(),
					));
				}
				Ok(DataSourceEvent::Patch(flag))
			}
			"delete" => Ok(DataSourceEvent::Delete(serde_json::from_str(data)?)),
			other => Err(FlagsCoreError::InvalidPayload(format!(
				"unknown event type '{other}'"
			))),
		}
	}
}

/// Data for a delete event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteData {
	pub key: String,
	pub version: u64,
}

/// Broad category of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
	/// Transport-level failure; worth retrying.
	Network,
	/// The server rejected the credentials. Retrying will not help.
	Unauthorized,
	/// The server answered with an unexpected status.
	Server { status: u16 },
	/// The payload could not be decoded.
	InvalidPayload,
}

/// A failure reported by a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
	pub kind: SyncErrorKind,
	pub message: String,
}

impl SyncError {
	pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}

	pub fn network(message: impl Into<String>) -> Self {
		Self::new(SyncErrorKind::Network, message)
	}

	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self::new(SyncErrorKind::Unauthorized, message)
	}

	/// Returns true if retrying the same request could succeed.
	pub fn is_retryable(&self) -> bool {
		match self.kind {
			SyncErrorKind::Network => true,
			SyncErrorKind::Server { status } => matches!(status, 429 | 408 | 500 | 502 | 503 | 504),
			SyncErrorKind::Unauthorized | SyncErrorKind::InvalidPayload => false,
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind {
			SyncErrorKind::Network => write!(f, "network error: {}", self.message),
			SyncErrorKind::Unauthorized => write!(f, "unauthorized: {}", self.message),
			SyncErrorKind::Server { status } => {
				write!(f, "server error ({status}): {}", self.message)
			}
			SyncErrorKind::InvalidPayload => write!(f, "invalid payload: {}", self.message),
		}
	}
}

impl std::error::Error for SyncError {}

impl From<FlagsCoreError> for SyncError {
	fn from(err: FlagsCoreError) -> Self {
		SyncError::new(SyncErrorKind::InvalidPayload, err.to_string())
	}
}
