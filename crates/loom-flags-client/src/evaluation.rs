// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed evaluation against a snapshot.
//!
//! Every accessor goes through [`evaluate`], parameterized by a
//! [`FlagType`]. Evaluation never fails: a missing flag, a type mismatch or
//! a client with no installed snapshot all resolve to the caller default
//! with an error reason.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use loom_flags_client_core::{ErrorKind, Flag, FlagSnapshot, FlagValue, VariationDetail};

/// A value type that can be read from a flag.
pub trait FlagType: Sized {
	/// Converts a stored value, or returns `None` on a type mismatch.
	fn from_flag_value(value: &FlagValue) -> Option<Self>;

	/// Converts back for event reporting.
	fn to_flag_value(&self) -> FlagValue;
}

impl FlagType for bool {
	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_bool()
	}

	fn to_flag_value(&self) -> FlagValue {
		FlagValue::Bool(*self)
	}
}

impl FlagType for i64 {
	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_i64()
	}

	fn to_flag_value(&self) -> FlagValue {
		FlagValue::Int(*self)
	}
}

impl FlagType for f64 {
	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_f64()
	}

	fn to_flag_value(&self) -> FlagValue {
		FlagValue::Double(*self)
	}
}

impl FlagType for String {
	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_str().map(str::to_string)
	}

	fn to_flag_value(&self) -> FlagValue {
		FlagValue::String(self.clone())
	}
}

impl FlagType for serde_json::Value {
	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		Some(value.to_json())
	}

	fn to_flag_value(&self) -> FlagValue {
		FlagValue::from(self.clone())
	}
}

/// Outcome of an evaluation, with the flag record it was read from.
pub(crate) struct Evaluated<T> {
	pub detail: VariationDetail<T>,
	pub flag: Option<Arc<Flag>>,
}

/// Evaluates `key` as `T` against `snapshot`.
pub(crate) fn evaluate<T: FlagType>(snapshot: &FlagSnapshot, key: &str, default: T) -> Evaluated<T> {
	let flag = match lookup(snapshot, key) {
		Ok(flag) => flag,
		Err(kind) => {
			return Evaluated {
				detail: VariationDetail::fallback(default, kind),
				flag: None,
			}
		}
	};

	if flag.value.is_null() {
		return Evaluated {
			detail: VariationDetail {
				value: default,
				variation_index: None,
				reason: flag.reason.clone(),
			},
			flag: Some(flag),
		};
	}

	let detail = match T::from_flag_value(&flag.value) {
		Some(value) => VariationDetail {
			value,
			variation_index: flag.variation,
			reason: flag.reason.clone(),
		},
		None => VariationDetail::fallback(default, ErrorKind::WrongType),
	};
	Evaluated {
		detail,
		flag: Some(flag),
	}
}

fn lookup(snapshot: &FlagSnapshot, key: &str) -> Result<Arc<Flag>, ErrorKind> {
	if !snapshot.is_installed() {
		return Err(ErrorKind::ClientNotReady);
	}
	snapshot.get(key).cloned().ok_or(ErrorKind::FlagNotFound)
}

/// A string result that borrows either the caller default or the flag
/// record held by the snapshot it was read from. The record stays alive
/// for as long as this value does, even if a newer snapshot is installed.
#[derive(Clone)]
pub enum StringVariation<'a> {
	Default(&'a str),
	Shared(SharedString),
}

/// A string value owned by a flag record.
#[derive(Clone)]
pub struct SharedString(Arc<Flag>);

impl SharedString {
	fn new(flag: Arc<Flag>) -> Option<Self> {
		flag.value.as_str()?;
		Some(Self(flag))
	}

	pub fn as_str(&self) -> &str {
		// Construction guarantees a string value.
		self.0.value.as_str().unwrap_or_default()
	}
}

impl<'a> StringVariation<'a> {
	pub fn as_str(&self) -> &str {
		match self {
			StringVariation::Default(s) => s,
			StringVariation::Shared(shared) => shared.as_str(),
		}
	}

	/// Returns true if the result is the caller default.
	pub fn is_default(&self) -> bool {
		matches!(self, StringVariation::Default(_))
	}
}

impl Deref for StringVariation<'_> {
	type Target = str;

	fn deref(&self) -> &str {
		self.as_str()
	}
}

impl AsRef<str> for StringVariation<'_> {
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}

impl PartialEq<&str> for StringVariation<'_> {
	fn eq(&self, other: &&str) -> bool {
		self.as_str() == *other
	}
}

impl fmt::Debug for StringVariation<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self.as_str(), f)
	}
}

impl fmt::Display for StringVariation<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Evaluates `key` as a borrowed string. Same semantics as the `String`
/// accessor; only the ownership of the result differs.
pub(crate) fn evaluate_str<'a>(
	snapshot: &FlagSnapshot,
	key: &str,
	default: &'a str,
) -> Evaluated<StringVariation<'a>> {
	let fallback = StringVariation::Default(default);
	let flag = match lookup(snapshot, key) {
		Ok(flag) => flag,
		Err(kind) => {
			return Evaluated {
				detail: VariationDetail::fallback(fallback, kind),
				flag: None,
			}
		}
	};

	let detail = if flag.value.is_null() {
		VariationDetail {
			value: fallback,
			variation_index: None,
			reason: flag.reason.clone(),
		}
	} else {
		match SharedString::new(Arc::clone(&flag)) {
			Some(shared) => VariationDetail {
				value: StringVariation::Shared(shared),
				variation_index: flag.variation,
				reason: flag.reason.clone(),
			},
			None => VariationDetail::fallback(fallback, ErrorKind::WrongType),
		}
	};
	Evaluated {
		detail,
		flag: Some(flag),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_flags_client_core::{EvaluationReason, SnapshotOrigin};
	use proptest::prelude::*;

	fn snapshot(flags: Vec<Flag>) -> FlagSnapshot {
		FlagSnapshot::from_flags(1, SnapshotOrigin::DataSource, flags)
	}

	#[test]
	fn test_not_ready_before_install() {
		let detail = evaluate(&FlagSnapshot::empty(), "x", "fallback".to_string()).detail;
		assert_eq!(detail.value, "fallback");
		assert_eq!(detail.error_kind(), Some(ErrorKind::ClientNotReady));
	}

	#[test]
	fn test_flag_not_found() {
		let detail = evaluate(&snapshot(vec![]), "missing", 3i64).detail;
		assert_eq!(detail.value, 3);
		assert_eq!(detail.error_kind(), Some(ErrorKind::FlagNotFound));
	}

	#[test]
	fn test_served_value_carries_metadata() {
		let s = snapshot(vec![Flag::new("a", true)
			.with_variation(1)
			.with_reason(EvaluationReason::Fallthrough)]);
		let detail = evaluate(&s, "a", false).detail;
		assert!(detail.value);
		assert_eq!(detail.variation_index, Some(1));
		assert_eq!(detail.reason, Some(EvaluationReason::Fallthrough));
	}

	#[test]
	fn test_wrong_type() {
		let s = snapshot(vec![Flag::new("a", "on").with_variation(0)]);
		let detail = evaluate(&s, "a", false).detail;
		assert!(!detail.value);
		assert_eq!(detail.variation_index, None);
		assert_eq!(detail.error_kind(), Some(ErrorKind::WrongType));
	}

	#[test]
	fn test_null_value_uses_default_with_flag_reason() {
		let s = snapshot(vec![Flag::new("a", FlagValue::Null)
			.with_variation(2)
			.with_reason(EvaluationReason::Off)]);
		let detail = evaluate(&s, "a", 9i64).detail;
		assert_eq!(detail.value, 9);
		assert_eq!(detail.variation_index, None);
		assert_eq!(detail.reason, Some(EvaluationReason::Off));
	}

	#[test]
	fn test_numeric_accessors_coerce() {
		let s = snapshot(vec![Flag::new("d", 2.7), Flag::new("i", 4i64)]);
		assert_eq!(evaluate(&s, "d", 0i64).detail.value, 2);
		assert_eq!(evaluate(&s, "i", 0.0f64).detail.value, 4.0);
	}

	#[test]
	fn test_json_accepts_any_value() {
		let s = snapshot(vec![Flag::new("a", 5i64), Flag::new(
			"b",
			FlagValue::Json(serde_json::json!({"x": 1})),
		)]);
		assert_eq!(
			evaluate(&s, "a", serde_json::Value::Null).detail.value,
			serde_json::json!(5)
		);
		assert_eq!(
			evaluate(&s, "b", serde_json::Value::Null).detail.value,
			serde_json::json!({"x": 1})
		);
	}

	#[test]
	fn test_borrowed_string_outlives_snapshot() {
		let s = snapshot(vec![Flag::new("theme", "dark")]);
		let Evaluated { detail, flag } = evaluate_str(&s, "theme", "light");
		drop(s);
		assert_eq!(detail.value, "dark");
		assert!(!detail.value.is_default());
		assert_eq!(flag.unwrap().key, "theme");
	}

	#[test]
	fn test_borrowed_string_falls_back() {
		let s = snapshot(vec![Flag::new("n", 1i64)]);
		let detail = evaluate_str(&s, "n", "light").detail;
		assert_eq!(detail.value, "light");
		assert!(detail.value.is_default());
		assert_eq!(detail.error_kind(), Some(ErrorKind::WrongType));

		let Evaluated { detail, flag } = evaluate_str(&s, "missing", "light");
		assert_eq!(&*detail.value, "light");
		assert_eq!(detail.error_kind(), Some(ErrorKind::FlagNotFound));
		assert!(flag.is_none());
	}

	fn arb_value() -> impl Strategy<Value = FlagValue> {
		prop_oneof![
			Just(FlagValue::Null),
			any::<bool>().prop_map(FlagValue::Bool),
			any::<i64>().prop_map(FlagValue::Int),
			"[a-z]{0,4}".prop_map(FlagValue::String),
		]
	}

	proptest! {
		#[test]
		fn string_flavors_agree(value in arb_value(), default in "[A-Z]{0,4}") {
			let s = snapshot(vec![Flag::new("k", value)]);
			let owned = evaluate(&s, "k", default.clone()).detail;
			let borrowed = evaluate_str(&s, "k", &default).detail;
			prop_assert_eq!(owned.value.as_str(), borrowed.value.as_str());
			prop_assert_eq!(owned.variation_index, borrowed.variation_index);
			prop_assert_eq!(owned.reason, borrowed.reason);
		}

		#[test]
		fn missing_keys_always_return_default(default in any::<i64>(), key in "[a-z]{1,6}") {
			let s = snapshot(vec![Flag::new("present", 1i64)]);
			prop_assume!(key != "present");
			let detail = evaluate(&s, &key, default).detail;
			prop_assert_eq!(detail.value, default);
			prop_assert_eq!(detail.error_kind(), Some(ErrorKind::FlagNotFound));
		}
	}
}
