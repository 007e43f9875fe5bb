// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors produced while decoding flag payloads.
#[derive(Debug, Error)]
pub enum FlagsCoreError {
	/// The payload parsed as JSON but has the wrong shape.
	#[error("invalid flag payload: {0}")]
	InvalidPayload(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, FlagsCoreError>;
