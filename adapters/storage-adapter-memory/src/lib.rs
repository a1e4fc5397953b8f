//! In-Memory Storage Adapter
//!
//! Implements the StorageAdapter trait over an ordered in-memory map. Used
//! by tests and by repos that do not need persistence; contents vanish with
//! the process. Shared clones see the same map, so a "reopened" repo in a
//! test can hand the same adapter instance to a second repo.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use vellum::error::VelResult;
use vellum::storage_adapter::{StorageAdapter, StorageEntry, key_has_prefix};

#[derive(Clone, Debug, Default)]
pub struct StorageAdapterMemory {
	entries: Arc<RwLock<BTreeMap<Vec<String>, Vec<u8>>>>,
}

impl StorageAdapterMemory {
	pub fn new() -> StorageAdapterMemory {
		StorageAdapterMemory::default()
	}

	/// Number of stored entries, for tests.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

#[async_trait]
impl StorageAdapter for StorageAdapterMemory {
	fn name(&self) -> &str {
		"memory"
	}

	async fn load(&self, key: &[String]) -> VelResult<Option<Vec<u8>>> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn save(&self, key: &[String], data: &[u8]) -> VelResult<()> {
		self.entries.write().await.insert(key.to_vec(), data.to_vec());
		Ok(())
	}

	async fn remove(&self, key: &[String]) -> VelResult<()> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn load_range(&self, prefix: &[String]) -> VelResult<Vec<StorageEntry>> {
		let entries = self.entries.read().await;
		Ok(entries
			.iter()
			.filter(|(key, _)| key_has_prefix(key, prefix))
			.map(|(key, data)| StorageEntry { key: key.clone(), data: data.clone() })
			.collect())
	}

	async fn remove_range(&self, prefix: &[String]) -> VelResult<()> {
		let mut entries = self.entries.write().await;
		entries.retain(|key, _| !key_has_prefix(key, prefix));
		Ok(())
	}
}

// vim: ts=4
