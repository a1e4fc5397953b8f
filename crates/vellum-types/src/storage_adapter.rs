//! Storage Adapter
//!
//! Trait for pluggable key-range key/value backends. Storage participates in
//! the sync protocol as a storage-kind channel: the driver in the core crate
//! translates sync-requests into `load`/`load_range` calls and persists every
//! received update transmission through `save`.
//!
//! # Key layout
//!
//! Keys are string paths. The core driver uses:
//! - `[doc_id]` for full snapshots
//! - `[doc_id, "update", version_tag]` for incremental deltas, where
//!   `version_tag` is the URL-safe base64 of the JSON of the delta's target
//!   version. Readers merge all deltas under `[doc_id, "update", *]` ordered
//!   by `version_tag` lexicographically.
//!
//! Implementations must be safe against concurrent calls for different keys
//! and serialize calls for the same key.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::VelResult;

/// A stored entry returned by range loads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageEntry {
	pub key: Vec<String>,
	pub data: Vec<u8>,
}

#[async_trait]
pub trait StorageAdapter: Debug + Send + Sync {
	/// Human-readable backend name, used for the storage channel identity.
	fn name(&self) -> &str;

	/// Load the value at `key`, `None` when absent.
	async fn load(&self, key: &[String]) -> VelResult<Option<Vec<u8>>>;

	/// Store `data` at `key`, replacing any previous value.
	async fn save(&self, key: &[String], data: &[u8]) -> VelResult<()>;

	/// Remove the value at `key`. Removing an absent key is not an error.
	async fn remove(&self, key: &[String]) -> VelResult<()>;

	/// Load every entry whose key starts with `prefix`, in lexicographic
	/// key order.
	async fn load_range(&self, prefix: &[String]) -> VelResult<Vec<StorageEntry>>;

	/// Remove every entry whose key starts with `prefix`.
	async fn remove_range(&self, prefix: &[String]) -> VelResult<()>;
}

/// True when `key` starts with `prefix`, component-wise.
pub fn key_has_prefix(key: &[String], prefix: &[String]) -> bool {
	key.len() >= prefix.len() && key.iter().zip(prefix.iter()).all(|(a, b)| a == b)
}

// vim: ts=4
