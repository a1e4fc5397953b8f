//! Shared helpers for the end-to-end sync tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use vellum::net::bridge_pair;
use vellum::network::Clock;
use vellum::prelude::*;

/// Two repos joined by an in-process bridge. The first one initiates.
pub async fn connected_pair(a_peer: u64, b_peer: u64) -> (Repo, Repo) {
	let (bridge_a, bridge_b) = bridge_pair();
	let a = Repo::builder("alice")
		.peer_id(PeerId(a_peer))
		.network(Box::new(bridge_a))
		.start()
		.await
		.expect("start repo a");
	let b = Repo::builder("bob")
		.peer_id(PeerId(b_peer))
		.network(Box::new(bridge_b))
		.start()
		.await
		.expect("start repo b");
	(a, b)
}

pub const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll until `check` passes or the timeout elapses.
pub async fn eventually<F>(what: &str, mut check: F)
where
	F: AsyncFnMut() -> bool,
{
	let deadline = tokio::time::Instant::now() + SYNC_TIMEOUT;
	loop {
		if check().await {
			return;
		}
		if tokio::time::Instant::now() > deadline {
			panic!("timed out waiting for {}", what);
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

/// Manually advanced wall clock for expiry tests.
#[derive(Clone)]
pub struct SimClock(Arc<AtomicI64>);

impl SimClock {
	pub fn new(start_ms: i64) -> SimClock {
		SimClock(Arc::new(AtomicI64::new(start_ms)))
	}

	pub fn advance(&self, millis: i64) {
		self.0.fetch_add(millis, Ordering::SeqCst);
	}

	pub fn as_clock(&self) -> Clock {
		let inner = self.0.clone();
		Arc::new(move || Timestamp(inner.load(Ordering::SeqCst)))
	}
}

// vim: ts=4
