// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable storage for flag snapshots.
//!
//! Backends store opaque text per environment. The client writes the JSON
//! produced by [`FlagSnapshot::to_json_string`] and restores it on startup
//! so evaluation can serve the last known flags while offline.
//!
//! [`FlagSnapshot::to_json_string`]: loom_flags_client_core::FlagSnapshot::to_json_string

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PersistenceError;

/// Stores serialized flags keyed by environment.
///
/// Failures are reported to the caller, which logs them; they never change
/// the client status.
#[async_trait]
pub trait FlagPersistence: Send + Sync {
	/// Stores `data` for `environment`, replacing any earlier value.
	async fn save(&self, environment: &str, data: &str) -> Result<(), PersistenceError>;

	/// Loads the last value stored for `environment`.
	async fn load(&self, environment: &str) -> Result<Option<String>, PersistenceError>;
}

/// Shared persistence handle.
pub type SharedFlagPersistence = Arc<dyn FlagPersistence>;

/// Keeps one file per environment under a directory.
///
/// File names are derived from a SHA-256 of the environment key so mobile
/// keys never appear on disk. Writes go to a temporary file which is then
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FileFlagStore {
	directory: PathBuf,
}

impl FileFlagStore {
	pub fn new(directory: impl Into<PathBuf>) -> Self {
		Self {
			directory: directory.into(),
		}
	}

	pub fn directory(&self) -> &Path {
		&self.directory
	}

	/// Returns the file used for `environment`.
	pub fn path_for(&self, environment: &str) -> PathBuf {
		let digest = Sha256::digest(environment.as_bytes());
		self.directory
			.join(format!("flags-{}.json", hex::encode(digest)))
	}
}

#[async_trait]
impl FlagPersistence for FileFlagStore {
	async fn save(&self, environment: &str, data: &str) -> Result<(), PersistenceError> {
		tokio::fs::create_dir_all(&self.directory).await?;

		let path = self.path_for(environment);
		let tmp = path.with_extension(format!(
			"json.tmp.{}.{:016x}",
			std::process::id(),
			fastrand::u64(..)
		));
		tokio::fs::write(&tmp, data).await?;
		if let Err(e) = tokio::fs::rename(&tmp, &path).await {
			let _ = tokio::fs::remove_file(&tmp).await;
			return Err(e.into());
		}

		debug!(path = %path.display(), bytes = data.len(), "Saved flags");
		Ok(())
	}

	async fn load(&self, environment: &str) -> Result<Option<String>, PersistenceError> {
		let path = self.path_for(environment);
		match tokio::fs::read_to_string(&path).await {
			Ok(data) => {
				debug!(path = %path.display(), bytes = data.len(), "Loaded flags");
				Ok(Some(data))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-process persistence, mainly for tests and ephemeral clients.
#[derive(Debug, Default, Clone)]
pub struct MemoryFlagStore {
	entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryFlagStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the stored value without going through the async trait.
	pub fn get(&self, environment: &str) -> Option<String> {
		self.entries.lock().get(environment).cloned()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

#[async_trait]
impl FlagPersistence for MemoryFlagStore {
	async fn save(&self, environment: &str, data: &str) -> Result<(), PersistenceError> {
		self.entries
			.lock()
			.insert(environment.to_string(), data.to_string());
		Ok(())
	}

	async fn load(&self, environment: &str) -> Result<Option<String>, PersistenceError> {
		Ok(self.get(environment))
	}
}
