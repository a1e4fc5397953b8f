//! End-to-end synchronization over the in-process bridge

mod common;

use common::{SYNC_TIMEOUT, connected_pair, eventually};
use std::sync::Arc;
use vellum::prelude::*;

#[tokio::test]
async fn single_edit_reaches_the_other_side() {
	let (a, b) = connected_pair(100, 200).await;

	let doc_a = a.get("d1").await.unwrap();
	let doc_b = b.get("d1").await.unwrap();

	doc_a.change(|doc| doc.get_text("text").insert(0, "hi")).unwrap();

	doc_b
		.wait_for_sync(Some(ChannelKind::Network), SYNC_TIMEOUT)
		.await
		.unwrap();
	eventually("edit to arrive", async || doc_b.doc().text("text") == "hi").await;

	a.shutdown().await.unwrap();
	b.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_edits_converge_without_looping() {
	// edit while offline, then connect
	let a = Repo::builder("alice").peer_id(PeerId(100)).start().await.unwrap();
	let b = Repo::builder("bob").peer_id(PeerId(200)).start().await.unwrap();

	let doc_a = a.get("d1").await.unwrap();
	let doc_b = b.get("d1").await.unwrap();
	doc_a.change(|doc| doc.get_text("text").insert(0, "A")).unwrap();
	doc_b.change(|doc| doc.get_text("text").insert(0, "B")).unwrap();

	let (mut bridge_a, mut bridge_b) = vellum::net::bridge_pair();
	use vellum::network::NetworkAdapter;
	bridge_a.start(a.adapter_ctx()).await.unwrap();
	bridge_b.start(b.adapter_ctx()).await.unwrap();

	doc_a
		.wait_for_sync(Some(ChannelKind::Network), SYNC_TIMEOUT)
		.await
		.unwrap();
	doc_b
		.wait_for_sync(Some(ChannelKind::Network), SYNC_TIMEOUT)
		.await
		.unwrap();

	eventually("both sides to converge", async || {
		let text_a = doc_a.doc().text("text");
		let text_b = doc_b.doc().text("text");
		text_a == text_b && text_a.contains('A') && text_a.contains('B')
	})
	.await;

	a.shutdown().await.unwrap();
	b.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_is_idempotent() {
	let a = Repo::builder("alice").start().await.unwrap();
	let first = a.get("d1").await.unwrap();
	let second = a.get("d1").await.unwrap();
	assert!(Arc::ptr_eq(first.doc(), second.doc()));
	a.shutdown().await.unwrap();
}

#[tokio::test]
async fn later_edits_keep_flowing_both_ways() {
	let (a, b) = connected_pair(100, 200).await;

	let doc_a = a.get("notes").await.unwrap();
	let doc_b = b.get("notes").await.unwrap();

	doc_a.change(|doc| doc.get_text("text").insert(0, "first")).unwrap();
	eventually("first edit", async || doc_b.doc().text("text") == "first").await;

	doc_b.change(|doc| {
		let text = doc.get_text("text");
		let len = text.len_unicode();
		text.insert(len, " second")
	})
	.unwrap();
	eventually("second edit", async || doc_a.doc().text("text") == "first second").await;

	a.shutdown().await.unwrap();
	b.shutdown().await.unwrap();
}

// vim: ts=4
