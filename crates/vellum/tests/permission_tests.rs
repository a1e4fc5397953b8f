//! Permission rules across a live connection

mod common;

use common::{SYNC_TIMEOUT, eventually};
use std::time::Duration;
use vellum::net::bridge_pair;
use vellum::prelude::*;

/// A server hides "secret" from user peers; the client can still sync
/// "public" but a direct request for "secret" comes back empty.
#[tokio::test]
async fn hidden_docs_stay_hidden() {
	let (bridge_client, bridge_server) = bridge_pair();

	let server = Repo::builder("server")
		.peer_id(PeerId(1))
		.service()
		.permissions(Permissions::allow_all().reveal_rule(|ctx| {
			ctx.doc_id.as_str() != "secret" || ctx.peer.kind != IdentityKind::User
		}))
		.network(Box::new(bridge_server))
		.start()
		.await
		.unwrap();

	let public = server.get("public").await.unwrap();
	public.change(|doc| doc.get_text("text").insert(0, "open")).unwrap();
	let secret = server.get("secret").await.unwrap();
	secret.change(|doc| doc.get_text("text").insert(0, "classified")).unwrap();

	let client = Repo::builder("client")
		.peer_id(PeerId(2))
		.network(Box::new(bridge_client))
		.start()
		.await
		.unwrap();

	let client_public = client.get("public").await.unwrap();
	client_public
		.wait_for_sync(Some(ChannelKind::Network), SYNC_TIMEOUT)
		.await
		.unwrap();
	eventually("public doc to sync", async || client_public.doc().text("text") == "open").await;

	// a direct sync-request for the hidden doc yields nothing
	let client_secret = client.get("secret").await.unwrap();
	let result = client_secret
		.wait_for_sync(Some(ChannelKind::Network), Duration::from_millis(500))
		.await;
	assert!(matches!(result, Err(Error::Timeout)));
	assert_eq!(client_secret.doc().text("text"), "");

	client.shutdown().await.unwrap();
	server.shutdown().await.unwrap();
}

/// `can_update` cuts propagation without hiding existence.
#[tokio::test]
async fn update_rule_blocks_propagation() {
	let (bridge_client, bridge_server) = bridge_pair();

	let server = Repo::builder("server")
		.peer_id(PeerId(1))
		.service()
		.permissions(
			Permissions::allow_all().update_rule(|ctx| ctx.doc_id.as_str() != "frozen"),
		)
		.network(Box::new(bridge_server))
		.start()
		.await
		.unwrap();
	let frozen = server.get("frozen").await.unwrap();

	let client = Repo::builder("client")
		.peer_id(PeerId(2))
		.network(Box::new(bridge_client))
		.start()
		.await
		.unwrap();
	let client_frozen = client.get("frozen").await.unwrap();

	// give establishment a moment, then edit on the server
	tokio::time::sleep(Duration::from_millis(100)).await;
	frozen.change(|doc| doc.get_text("text").insert(0, "held back")).unwrap();

	let result = client_frozen
		.wait_for_sync(Some(ChannelKind::Network), Duration::from_millis(500))
		.await;
	assert!(matches!(result, Err(Error::Timeout)));
	assert_eq!(client_frozen.doc().text("text"), "");

	client.shutdown().await.unwrap();
	server.shutdown().await.unwrap();
}

// vim: ts=4
