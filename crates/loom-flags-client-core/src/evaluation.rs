// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation reasons and the detail record returned to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a flag resolved to the value it did.
///
/// Non-error reasons are computed upstream and delivered with the flag. The
/// `Error` reason is produced locally when the caller default is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	/// The flag is switched off and served its off variation.
	Off,
	/// No rule matched; the fallthrough variation was served.
	Fallthrough,
	/// The context was individually targeted.
	TargetMatch,
	/// A targeting rule matched.
	#[serde(rename_all = "camelCase")]
	RuleMatch {
		rule_index: u32,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		rule_id: Option<String>,
	},
	/// A prerequisite flag did not return the required variation.
	#[serde(rename_all = "camelCase")]
	PrerequisiteFailed { prerequisite_key: String },
	/// The caller default was returned.
	#[serde(rename_all = "camelCase")]
	Error { error_kind: ErrorKind },
}

impl EvaluationReason {
	pub fn error(kind: ErrorKind) -> Self {
		EvaluationReason::Error { error_kind: kind }
	}

	/// Returns the error kind if this is an error reason.
	pub fn error_kind(&self) -> Option<ErrorKind> {
		match self {
			EvaluationReason::Error { error_kind } => Some(*error_kind),
			_ => None,
		}
	}

	/// Returns the serialized `kind` tag, e.g. `"RULE_MATCH"`.
	pub fn kind_name(&self) -> &'static str {
		match self {
			EvaluationReason::Off => "OFF",
			EvaluationReason::Fallthrough => "FALLTHROUGH",
			EvaluationReason::TargetMatch => "TARGET_MATCH",
			EvaluationReason::RuleMatch { .. } => "RULE_MATCH",
			EvaluationReason::PrerequisiteFailed { .. } => "PREREQUISITE_FAILED",
			EvaluationReason::Error { .. } => "ERROR",
		}
	}
}

impl fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EvaluationReason::Error { error_kind } => write!(f, "ERROR({error_kind})"),
			other => f.write_str(other.kind_name()),
		}
	}
}

/// Why an evaluation fell back to the caller default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
	/// No snapshot has been installed yet.
	ClientNotReady,
	/// The key is absent from the current snapshot.
	FlagNotFound,
	/// The stored value cannot be converted to the requested type.
	WrongType,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::ClientNotReady => "CLIENT_NOT_READY",
			ErrorKind::FlagNotFound => "FLAG_NOT_FOUND",
			ErrorKind::WrongType => "WRONG_TYPE",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The result of a detail evaluation. Owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationDetail<T> {
	pub value: T,
	pub variation_index: Option<u32>,
	/// `None` when the data source did not supply a reason for the flag.
	pub reason: Option<EvaluationReason>,
}

impl<T> VariationDetail<T> {
	/// A detail carrying the caller default and an error reason.
	pub fn fallback(value: T, kind: ErrorKind) -> Self {
		Self {
			value,
			variation_index: None,
			reason: Some(EvaluationReason::error(kind)),
		}
	}

	pub fn error_kind(&self) -> Option<ErrorKind> {
		self.reason.as_ref().and_then(EvaluationReason::error_kind)
	}

	/// Returns true if the value came from the snapshot rather than the default.
	pub fn is_from_flag(&self) -> bool {
		self.error_kind().is_none()
	}

	/// Maps the value while keeping the variation index and reason.
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VariationDetail<U> {
		VariationDetail {
			value: f(self.value),
			variation_index: self.variation_index,
			reason: self.reason,
		}
	}
}
