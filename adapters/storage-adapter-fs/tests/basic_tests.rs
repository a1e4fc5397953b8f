//! Filesystem adapter contract tests

use tempfile::TempDir;
use vellum::storage_adapter::StorageAdapter;
use vellum_storage_adapter_fs::StorageAdapterFs;

fn key(parts: &[&str]) -> Vec<String> {
	parts.iter().map(|s| s.to_string()).collect()
}

async fn create_test_adapter() -> (StorageAdapterFs, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = StorageAdapterFs::new(temp_dir.path()).await.expect("Failed to create adapter");
	(adapter, temp_dir)
}

#[tokio::test]
async fn save_load_remove() {
	let (adapter, _temp) = create_test_adapter().await;
	let k = key(&["d1"]);

	assert_eq!(adapter.load(&k).await.unwrap(), None);
	adapter.save(&k, b"hello").await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(b"hello".to_vec()));

	adapter.remove(&k).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), None);
	adapter.remove(&k).await.unwrap();
}

#[tokio::test]
async fn range_follows_key_order() {
	let (adapter, _temp) = create_test_adapter().await;
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
}

#[tokio::test]
async fn awkward_doc_ids_survive() {
	let (adapter, _temp) = create_test_adapter().await;
	let k = key(&["notes/2026 draft~v1", "update", "AbC-_12"]);
	adapter.save(&k, &[42]).await.unwrap();
	assert_eq!(adapter.load(&k).await.unwrap(), Some(vec![42]));

	let entries = adapter.load_range(&key(&["notes/2026 draft~v1"])).await.unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].key, k);
}

#[tokio::test]
async fn remove_range_scopes_to_prefix() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.save(&key(&["d1"]), &[0]).await.unwrap();
	adapter.save(&key(&["d1", "update", "a"]), &[1]).await.unwrap();
	adapter.save(&key(&["d2"]), &[9]).await.unwrap();

	adapter.remove_range(&key(&["d1"])).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), None);
	assert_eq!(adapter.load(&key(&["d2"])).await.unwrap(), Some(vec![9]));
}

#[tokio::test]
async fn contents_survive_reopen() {
	let temp_dir = TempDir::new().unwrap();
	{
		let adapter = StorageAdapterFs::new(temp_dir.path()).await.unwrap();
		adapter.save(&key(&["d1"]), b"persisted").await.unwrap();
	}
	let adapter = StorageAdapterFs::new(temp_dir.path()).await.unwrap();
	assert_eq!(adapter.load(&key(&["d1"])).await.unwrap(), Some(b"persisted".to_vec()));
}

// vim: ts=4
