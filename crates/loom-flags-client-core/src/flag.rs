// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluated flag records as delivered by the data source.

use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationReason;

/// The evaluated value of a flag.
///
/// Serialized untagged so the persisted and wire forms are plain JSON values.
/// Integral numbers deserialize as [`FlagValue::Int`], other numbers as
/// [`FlagValue::Double`], arrays and objects as [`FlagValue::Json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FlagValue {
	/// No value is served; evaluation falls back to the caller default.
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Double(f64),
	String(String),
	Json(serde_json::Value),
}

/// The type tag of a [`FlagValue`], used to report type mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
	Null,
	Bool,
	Number,
	String,
	Json,
}

impl FlagValue {
	/// Returns the type tag of this value. Both integer and floating point
	/// values report [`ValueKind::Number`].
	pub fn kind(&self) -> ValueKind {
		match self {
			FlagValue::Null => ValueKind::Null,
			FlagValue::Bool(_) => ValueKind::Bool,
			FlagValue::Int(_) | FlagValue::Double(_) => ValueKind::Number,
			FlagValue::String(_) => ValueKind::String,
			FlagValue::Json(_) => ValueKind::Json,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, FlagValue::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	/// Returns the value as an integer. Floating point values are truncated
	/// toward zero and saturate at the `i64` bounds; NaN is rejected.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			FlagValue::Int(n) => Some(*n),
			FlagValue::Double(d) if !d.is_nan() => Some(*d as i64),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			FlagValue::Int(n) => Some(*n as f64),
			FlagValue::Double(d) => Some(*d),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Converts this value into an untyped JSON value.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			FlagValue::Null => serde_json::Value::Null,
			FlagValue::Bool(b) => serde_json::Value::Bool(*b),
			FlagValue::Int(n) => serde_json::Value::from(*n),
			FlagValue::Double(d) => serde_json::Number::from_f64(*d)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			FlagValue::String(s) => serde_json::Value::String(s.clone()),
			FlagValue::Json(v) => v.clone(),
		}
	}
}

impl From<serde_json::Value> for FlagValue {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => FlagValue::Null,
			serde_json::Value::Bool(b) => FlagValue::Bool(b),
			serde_json::Value::Number(n) => match n.as_i64() {
				Some(i) => FlagValue::Int(i),
				None => FlagValue::Double(n.as_f64().unwrap_or_default()),
			},
			serde_json::Value::String(s) => FlagValue::String(s),
			other => FlagValue::Json(other),
		}
	}
}

impl From<bool> for FlagValue {
	fn from(value: bool) -> Self {
		FlagValue::Bool(value)
	}
}

impl From<i64> for FlagValue {
	fn from(value: i64) -> Self {
		FlagValue::Int(value)
	}
}

impl From<f64> for FlagValue {
	fn from(value: f64) -> Self {
		FlagValue::Double(value)
	}
}

impl From<&str> for FlagValue {
	fn from(value: &str) -> Self {
		FlagValue::String(value.to_string())
	}
}

impl From<String> for FlagValue {
	fn from(value: String) -> Self {
		FlagValue::String(value)
	}
}

/// A single evaluated flag for the current context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
	/// May be omitted on the wire when the record is keyed by its parent object.
	#[serde(default)]
	pub key: String,
	#[serde(default)]
	pub value: FlagValue,
	/// Index into the flag's configured variation list, if one was served.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation: Option<u32>,
	/// Item version used to order incremental updates for this key.
	#[serde(default)]
	pub version: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flag_version: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<EvaluationReason>,
	/// When set, every evaluation of this flag is reported as a full event.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub track_events: bool,
	/// Tombstone marker. Deleted flags are kept only to order later updates.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub deleted: bool,
}

impl Flag {
	/// Creates a live flag with the given value and version 0.
	pub fn new(key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
			variation: None,
			version: 0,
			flag_version: None,
			reason: None,
			track_events: false,
			deleted: false,
		}
	}

	/// Creates a tombstone for `key` at `version`.
	pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
		Self {
			deleted: true,
			version,
			..Self::new(key, FlagValue::Null)
		}
	}

	pub fn with_variation(mut self, variation: u32) -> Self {
		self.variation = Some(variation);
		self
	}

	pub fn with_version(mut self, version: u64) -> Self {
		self.version = version;
		self
	}

	pub fn with_reason(mut self, reason: EvaluationReason) -> Self {
		self.reason = Some(reason);
		self
	}

	pub fn with_track_events(mut self, track_events: bool) -> Self {
		self.track_events = track_events;
		self
	}

	/// Returns true if both records would evaluate identically: same value,
	/// variation index and reason. Versions are ignored.
	pub fn evaluates_same_as(&self, other: &Flag) -> bool {
		self.value == other.value && self.variation == other.variation && self.reason == other.reason
	}

	/// Returns true if an update carrying `incoming` may replace this record.
	pub fn accepts_update(&self, incoming: u64) -> bool {
		incoming >= self.version
	}
}
