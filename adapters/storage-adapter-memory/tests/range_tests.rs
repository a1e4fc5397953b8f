//! Key-range contract tests for the in-memory adapter

use vellum::storage_adapter::StorageAdapter;
use vellum_storage_adapter_memory::StorageAdapterMemory;

fn key(parts: &[&str]) -> Vec<String> {
	parts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn save_load_remove() {
	let adapter = StorageAdapterMemory::new();
	let k = key(&["d1"]);

	assert_eq!(adapter.load(&k).await.unwrap(), None);
	adapter.save(&k, &[1, 2, 3]).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(vec![1, 2, 3]));

	adapter.save(&k, &[9]).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(vec![9]));

	adapter.remove(&k).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), None);
	// removing again is not an error
	adapter.remove(&k).await.unwrap();
}

#[tokio::test]
async fn load_range_is_prefix_scoped_and_ordered() {
	let adapter = StorageAdapterMemory::new();
	adapter.save(&key(&["d1"]), &[0]).await.unwrap();
	adapter.save(&key(&["d1", "update", "b"]), &[2]).await.unwrap();
	adapter.save(&key(&["d1", "update", "a"]), &[1]).await.unwrap();
	adapter.save(&key(&["d2"]), &[9]).await.unwrap();

	let entries = adapter.load_range(&key(&["d1"])).await.unwrap();
	let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
	assert_eq!(
		keys,
		vec![key(&["d1"]), key(&["d1", "update", "a"]), key(&["d1", "update", "b"])]
	);

	let updates = adapter.load_range(&key(&["d1", "update"])).await.unwrap();
	assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn remove_range_only_touches_the_prefix() {
	let adapter = StorageAdapterMemory::new();
	adapter.save(&key(&["d1"]), &[0]).await.unwrap();
	adapter.save(&key(&["d1", "update", "a"]), &[1]).await.unwrap();
	adapter.save(&key(&["d2"]), &[9]).await.unwrap();

	adapter.remove_range(&key(&["d1", "update"])).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), Some(vec![0]));
	assert_eq!(adapter.load(&key(&["d2"])).await.unwrap(), Some(vec![9]));
	assert!(adapter.load_range(&key(&["d1", "update"])).await.unwrap().is_empty());
}

#[tokio::test]
async fn clones_share_contents() {
	let adapter = StorageAdapterMemory::new();
	let other = adapter.clone();
	adapter.save(&key(&["d1"]), &[7]).await.unwrap();
	assert_eq!(other.load(&key(&["d1"])).await.unwrap(), Some(vec![7]));
}

// vim: ts=4
