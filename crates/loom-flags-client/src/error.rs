// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_flags_client_core::FlagsCoreError;
use thiserror::Error;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("persistence backend error: {0}")]
	Backend(String),
}

/// Errors returned by the flags client.
///
/// Evaluation never returns these; it resolves to the caller default instead.
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("client has been shut down")]
	ClientShutdown,

	#[error("mobile key is required")]
	MissingMobileKey,

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("persistence failed: {0}")]
	Persistence(#[from] PersistenceError),

	#[error(transparent)]
	Core(#[from] FlagsCoreError),

	/// Returned by [`EventSender`](crate::EventSender) implementations.
	#[error("event delivery failed: {0}")]
	EventDelivery(String),

	#[error("unknown environment: {0}")]
	UnknownEnvironment(String),
}

/// Result type alias for flags client operations.
pub type Result<T> = std::result::Result<T, FlagsError>;
