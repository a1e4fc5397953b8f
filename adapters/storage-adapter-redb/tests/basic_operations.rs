//! Basic redb adapter operation tests
//!
//! Tests the key-range contract against a real database file

use tempfile::TempDir;
use vellum::storage_adapter::StorageAdapter;
use vellum_storage_adapter_redb::StorageAdapterRedb;

fn key(parts: &[&str]) -> Vec<String> {
	parts.iter().map(|s| s.to_string()).collect()
}

async fn create_test_adapter() -> (StorageAdapterRedb, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = StorageAdapterRedb::new(temp_dir.path().join("sync.db"))
		.await
		.expect("Failed to create adapter");
	(adapter, temp_dir)
}

#[tokio::test]
async fn save_load_remove() {
	let (adapter, _temp) = create_test_adapter().await;
	let k = key(&["d1"]);

	assert_eq!(adapter.load(&k).await.unwrap(), None);
	adapter.save(&k, &[1, 2, 3]).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(vec![1, 2, 3]));

	adapter.save(&k, &[4]).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(vec![4]));

	adapter.remove(&k).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), None);
	adapter.remove(&k).await.unwrap();
}

#[tokio::test]
async fn range_queries_respect_component_boundaries() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.save(&key(&["d1"]), &[0]).await.unwrap();
	adapter.save(&key(&["d1", "update", "a"]), &[1]).await.unwrap();
	adapter.save(&key(&["d1", "update", "b"]), &[2]).await.unwrap();
	// "d10" must not match the prefix ["d1"]
	adapter.save(&key(&["d10"]), &[9]).await.unwrap();

	let entries = adapter.load_range(&key(&["d1"])).await.unwrap();
	assert_eq!(entries.len(), 3);
	assert!(entries.iter().all(|e| e.key[0] == "d1"));

	let updates = adapter.load_range(&key(&["d1", "update"])).await.unwrap();
	let tags: Vec<_> = updates.iter().map(|e| e.key[2].clone()).collect();
	assert_eq!(tags, vec!["a", "b"]);
}

#[tokio::test]
async fn remove_range_scopes_to_prefix() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.save(&key(&["d1"]), &[0]).await.unwrap();
	adapter.save(&key(&["d1", "update", "a"]), &[1]).await.unwrap();
	adapter.save(&key(&["d2"]), &[9]).await.unwrap();

	adapter.remove_range(&key(&["d1", "update"])).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), Some(vec![0]));
	assert_eq!(adapter.load(&key(&["d2"])).await.unwrap(), Some(vec![9]));

	adapter.remove_range(&key(&["d1"])).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), None);
}

#[tokio::test]
async fn contents_survive_reopen() {
	let temp_dir = TempDir::new().unwrap();
	let path = temp_dir.path().join("sync.db");
	{
		let adapter = StorageAdapterRedb::new(&path).await.unwrap();
		adapter.save(&key(&["d1"]), b"persisted").await.unwrap();
	}
	let adapter = StorageAdapterRedb::new(&path).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), Some(b"persisted".to_vec()));
}

// vim: ts=4
