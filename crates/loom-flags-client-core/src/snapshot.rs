// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable point-in-time flag sets and the diff between two of them.
//!
//! A [`FlagSnapshot`] is never mutated after construction. Incremental
//! updates produce a new snapshot that shares unchanged `Arc<Flag>` records
//! with its predecessor.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FlagsCoreError, Result};
use crate::flag::{Flag, FlagValue};

/// Where a snapshot's contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
	/// The initial placeholder; never installed.
	Empty,
	/// Built from a data source put, patch or delete.
	DataSource,
	/// Restored from persisted flags.
	Persistence,
}

/// An immutable, point-in-time set of evaluated flags.
#[derive(Debug, Clone)]
pub struct FlagSnapshot {
	sequence: u64,
	origin: SnapshotOrigin,
	flags: HashMap<String, Arc<Flag>>,
}

impl FlagSnapshot {
	/// The placeholder snapshot held before anything is installed.
	pub fn empty() -> Self {
		Self {
			sequence: 0,
			origin: SnapshotOrigin::Empty,
			flags: HashMap::new(),
		}
	}

	/// Builds a snapshot holding exactly `flags`. Later duplicates of a key win.
	pub fn from_flags(
		sequence: u64,
		origin: SnapshotOrigin,
		flags: impl IntoIterator<Item = Flag>,
	) -> Self {
		let flags = flags
			.into_iter()
			.map(|flag| (flag.key.clone(), Arc::new(flag)))
			.collect();
		Self {
			sequence,
			origin,
			flags,
		}
	}

	/// Global install order. 0 means this snapshot was never installed.
	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	pub fn origin(&self) -> SnapshotOrigin {
		self.origin
	}

	pub fn is_installed(&self) -> bool {
		self.sequence > 0
	}

	/// Returns the live flag for `key`. Tombstones are not returned.
	pub fn get(&self, key: &str) -> Option<&Arc<Flag>> {
		self.flags.get(key).filter(|flag| !flag.deleted)
	}

	/// Returns the record for `key`, including tombstones.
	pub fn record(&self, key: &str) -> Option<&Arc<Flag>> {
		self.flags.get(key)
	}

	/// Iterates over live flags in arbitrary order.
	pub fn iter(&self) -> impl Iterator<Item = &Arc<Flag>> {
		self.flags.values().filter(|flag| !flag.deleted)
	}

	/// Number of live flags.
	pub fn len(&self) -> usize {
		self.iter().count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Copies out every live key with its value.
	pub fn values(&self) -> HashMap<String, FlagValue> {
		self.iter()
			.map(|flag| (flag.key.clone(), flag.value.clone()))
			.collect()
	}

	/// Returns a new snapshot with `flag` upserted, or `None` if the
	/// existing record for that key carries a newer version.
	pub fn with_upsert(&self, flag: Flag, sequence: u64) -> Option<Self> {
		if let Some(existing) = self.flags.get(&flag.key) {
			if !existing.accepts_update(flag.version) {
				return None;
			}
		}

		let mut flags = self.flags.clone();
		flags.insert(flag.key.clone(), Arc::new(flag));
		Some(Self {
			sequence,
			origin: SnapshotOrigin::DataSource,
			flags,
		})
	}

	/// Returns a new snapshot with a tombstone for `key`, under the same
	/// version rule as [`FlagSnapshot::with_upsert`].
	pub fn with_delete(&self, key: &str, version: u64, sequence: u64) -> Option<Self> {
		self.with_upsert(Flag::tombstone(key, version), sequence)
	}

	/// Computes the keys whose evaluation differs between `self` and `next`.
	///
	/// A key changes when it is live in exactly one of the two snapshots, or
	/// live in both with a different value, variation index or reason.
	/// The result is sorted by key.
	pub fn diff(&self, next: &FlagSnapshot) -> Vec<FlagChange> {
		let keys: BTreeSet<&str> = self
			.iter()
			.chain(next.iter())
			.map(|flag| flag.key.as_str())
			.collect();

		keys.into_iter()
			.filter_map(|key| match (self.get(key), next.get(key)) {
				(Some(old), Some(new)) if old.evaluates_same_as(new) => None,
				(_, Some(_)) => Some(FlagChange::new(key, FlagChangeKind::Updated)),
				(Some(_), None) => Some(FlagChange::new(key, FlagChangeKind::Deleted)),
				(None, None) => None,
			})
			.collect()
	}

	/// Serializes the live flags as a JSON object of key to flag.
	pub fn to_json_string(&self) -> Result<String> {
		let live: BTreeMap<&str, &Flag> = self
			.iter()
			.map(|flag| (flag.key.as_str(), flag.as_ref()))
			.collect();
		Ok(serde_json::to_string(&live)?)
	}

	/// Parses the format written by [`FlagSnapshot::to_json_string`].
	pub fn parse_flags(data: &str) -> Result<Vec<Flag>> {
		parse_flag_map(data)
	}
}

impl Default for FlagSnapshot {
	fn default() -> Self {
		Self::empty()
	}
}

/// Parses a JSON object of key to flag, filling in keys the records omit.
pub(crate) fn parse_flag_map(data: &str) -> Result<Vec<Flag>> {
	let value: serde_json::Value = serde_json::from_str(data)?;
	let serde_json::Value::Object(map) = value else {
		return Err(FlagsCoreError::InvalidPayload(
			"flag set must be a JSON object".to_string(),
		));
	};

	map.into_iter()
		.map(|(key, raw)| {
			let mut flag: Flag = serde_json::from_value(raw)?;
			if flag.key.is_empty() {
				flag.key = key;
			} else if flag.key != key {
				return Err(FlagsCoreError::InvalidPayload(format!(
					"flag record key '{}' does not match '{}'",
					flag.key, key
				)));
			}
			Ok(flag)
		})
		.collect()
}

/// How a flag changed between two installed snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagChangeKind {
	/// Added, or changed value, variation or reason.
	Updated,
	/// Removed or tombstoned.
	Deleted,
}

/// A single key's change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlagChange {
	pub key: String,
	pub kind: FlagChangeKind,
}

impl FlagChange {
	pub fn new(key: impl Into<String>, kind: FlagChangeKind) -> Self {
		Self {
			key: key.into(),
			kind,
		}
	}
}
