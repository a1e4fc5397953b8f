//! Persistence through the storage channel

mod common;

use common::{SYNC_TIMEOUT, eventually};
use std::sync::Arc;
use vellum::prelude::*;
use vellum_storage_adapter_memory::StorageAdapterMemory;

#[tokio::test]
async fn shutdown_flushes_and_reopen_restores() {
	let store = StorageAdapterMemory::new();

	{
		let repo = Repo::builder("writer")
			.peer_id(PeerId(100))
			.storage(Arc::new(store.clone()))
			.start()
			.await
			.unwrap();
		let doc = repo.get("d1").await.unwrap();
		doc.change(|doc| doc.get_text("text").insert(0, "Hello, world!")).unwrap();
		repo.shutdown().await.unwrap();
	}
	assert!(!store.is_empty().await);

	let repo = Repo::builder("reader")
		.peer_id(PeerId(200))
		.storage(Arc::new(store.clone()))
		.start()
		.await
		.unwrap();
	let doc = repo.get("d1").await.unwrap();
	doc.wait_for_sync(Some(ChannelKind::Storage), SYNC_TIMEOUT).await.unwrap();
	assert_eq!(doc.doc().text("text"), "Hello, world!");
	repo.shutdown().await.unwrap();
}

#[tokio::test]
async fn every_change_is_persisted_without_an_explicit_flush() {
	let store = StorageAdapterMemory::new();
	let repo = Repo::builder("writer")
		.peer_id(PeerId(100))
		.storage(Arc::new(store.clone()))
		.start()
		.await
		.unwrap();

	let doc = repo.get("d1").await.unwrap();
	doc.change(|doc| doc.get_text("text").insert(0, "persist me")).unwrap();

	// the change flows to the storage channel like any other subscriber
	eventually("delta to land in storage", async || store.len().await > 0).await;
	repo.shutdown().await.unwrap();
}

#[tokio::test]
async fn flush_compacts_deltas_into_a_snapshot() {
	let store = StorageAdapterMemory::new();
	let repo = Repo::builder("writer")
		.peer_id(PeerId(100))
		.storage(Arc::new(store.clone()))
		.start()
		.await
		.unwrap();

	let doc = repo.get("d1").await.unwrap();
	for i in 0..5 {
		doc.change(|doc| doc.get_text("text").insert(0, &i.to_string())).unwrap();
	}
	eventually("deltas to land", async || store.len().await > 0).await;

	repo.flush().await.unwrap();
	// after compaction only the snapshot at [doc_id] remains
	let entries = store.load_range(&["d1".to_string()]).await.unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].key, vec!["d1".to_string()]);

	repo.shutdown().await.unwrap();
}

#[tokio::test]
async fn delete_doc_clears_storage() {
	let store = StorageAdapterMemory::new();
	let repo = Repo::builder("writer")
		.peer_id(PeerId(100))
		.storage(Arc::new(store.clone()))
		.start()
		.await
		.unwrap();

	let doc = repo.get("d1").await.unwrap();
	doc.change(|doc| doc.get_text("text").insert(0, "doomed")).unwrap();
	repo.flush().await.unwrap();
	assert!(!store.is_empty().await);

	repo.delete_doc("d1").await.unwrap();
	repo.flush().await.unwrap();
	assert!(store.is_empty().await);

	repo.shutdown().await.unwrap();
}

/// A peer can pull a document it never held when the far side's storage has
/// it: the request is piped through the storage channel.
#[tokio::test]
async fn server_loads_from_storage_on_behalf_of_a_peer() {
	let store = StorageAdapterMemory::new();

	// seed storage through a first server lifetime
	{
		let seeder = Repo::builder("seeder")
			.peer_id(PeerId(1))
			.storage(Arc::new(store.clone()))
			.start()
			.await
			.unwrap();
		let doc = seeder.get("archive").await.unwrap();
		doc.change(|doc| doc.get_text("text").insert(0, "from the vault")).unwrap();
		seeder.shutdown().await.unwrap();
	}

	let (bridge_client, bridge_server) = vellum::net::bridge_pair();
	let server = Repo::builder("server")
		.peer_id(PeerId(1))
		.service()
		.storage(Arc::new(store.clone()))
		.network(Box::new(bridge_server))
		.start()
		.await
		.unwrap();
	let client = Repo::builder("client")
		.peer_id(PeerId(2))
		.network(Box::new(bridge_client))
		.start()
		.await
		.unwrap();

	// the server has not ensured "archive"; the client's request makes it
	// load the doc from storage and pipeline the reply
	let doc = client.get("archive").await.unwrap();
	doc.wait_for_sync(Some(ChannelKind::Network), SYNC_TIMEOUT).await.unwrap();
	eventually("archived text to arrive", async || doc.doc().text("text") == "from the vault")
		.await;

	client.shutdown().await.unwrap();
	server.shutdown().await.unwrap();
}

// vim: ts=4
