//! Ephemeral (presence) stores.
//!
//! Per `(doc, namespace)` the model holds two stores: a timerless one for our
//! own entries and an expiring one for entries received from peers. Entries
//! carry the sender's wall clock; receivers derive expiry from the embedded
//! timestamp, which is why `touch` must run before every heartbeat encode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prelude::*;

pub const DEFAULT_TIMEOUT_MS: i64 = 30_000;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
	data: Vec<u8>,
	timestamp: Timestamp,
}

/// Wire form of one store delta.
#[derive(Serialize, Deserialize)]
struct WireEntry {
	key: Box<str>,
	#[serde(with = "serde_bytes")]
	data: Vec<u8>,
	timestamp: Timestamp,
}

/// A single ephemeral key/value store. `timeout_ms = None` makes it
/// timerless: entries never expire (used for our own state). Expiring stores
/// drop entries whose embedded timestamp has aged past the timeout.
#[derive(Clone, Debug)]
pub struct EphemeralStore {
	entries: BTreeMap<Box<str>, Entry>,
	timeout_ms: Option<i64>,
}

impl EphemeralStore {
	pub fn timerless() -> EphemeralStore {
		EphemeralStore { entries: BTreeMap::new(), timeout_ms: None }
	}

	pub fn expiring(timeout_ms: i64) -> EphemeralStore {
		EphemeralStore { entries: BTreeMap::new(), timeout_ms: Some(timeout_ms) }
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn set(&mut self, key: impl Into<Box<str>>, data: Vec<u8>, now: Timestamp) {
		self.entries.insert(key.into(), Entry { data, timestamp: now });
	}

	/// Read one entry, honoring expiry for expiring stores.
	pub fn get(&self, key: &str, now: Timestamp) -> Option<&[u8]> {
		let entry = self.entries.get(key)?;
		if self.expired(entry, now) {
			return None;
		}
		Some(&entry.data)
	}

	/// All live entries at `now`.
	pub fn iter_fresh(&self, now: Timestamp) -> impl Iterator<Item = (&str, &[u8])> {
		self.entries
			.iter()
			.filter(move |(_, entry)| !self.expired(entry, now))
			.map(|(key, entry)| (key.as_ref(), entry.data.as_slice()))
	}

	/// Refresh every entry's timestamp to `now`. Receivers derive expiry
	/// from the embedded timestamps, so this runs before heartbeat encodes.
	pub fn touch(&mut self, now: Timestamp) {
		for entry in self.entries.values_mut() {
			entry.timestamp = now;
		}
	}

	/// Serialize the whole store as a transmissible delta.
	pub fn encode_all(&self) -> VelResult<Vec<u8>> {
		let wire: Vec<WireEntry> = self
			.entries
			.iter()
			.map(|(key, entry)| WireEntry {
				key: key.clone(),
				data: entry.data.clone(),
				timestamp: entry.timestamp,
			})
			.collect();
		let mut buf = Vec::new();
		ciborium::ser::into_writer(&wire, &mut buf)
			.map_err(|err| Error::Internal(format!("ephemeral encode: {}", err)))?;
		Ok(buf)
	}

	/// Touch then encode, so the receiver's expiry window restarts at `now`.
	pub fn encode_all_fresh(&mut self, now: Timestamp) -> VelResult<Vec<u8>> {
		self.touch(now);
		self.encode_all()
	}

	/// Merge a received delta. Entries older than the expiry window are
	/// dropped on the floor; a newer timestamp wins over a stored entry.
	/// Returns the keys whose value actually changed.
	pub fn apply(&mut self, data: &[u8], now: Timestamp) -> VelResult<Vec<Box<str>>> {
		let wire: Vec<WireEntry> = ciborium::de::from_reader(data)
			.map_err(|err| Error::Decode(format!("ephemeral delta: {}", err)))?;

		let mut changed = Vec::new();
		for incoming in wire {
			if let Some(timeout_ms) = self.timeout_ms {
				if now.elapsed_since(incoming.timestamp) >= timeout_ms {
					continue;
				}
			}
			match self.entries.get(&incoming.key) {
				Some(existing) if existing.timestamp > incoming.timestamp => {}
				Some(existing)
					if existing.timestamp == incoming.timestamp
						&& existing.data == incoming.data => {}
				_ => {
					changed.push(incoming.key.clone());
					self.entries.insert(
						incoming.key,
						Entry { data: incoming.data, timestamp: incoming.timestamp },
					);
				}
			}
		}
		Ok(changed)
	}

	/// Drop expired entries. Returns the removed keys.
	pub fn sweep(&mut self, now: Timestamp) -> Vec<Box<str>> {
		let Some(timeout_ms) = self.timeout_ms else { return Vec::new() };
		let mut removed = Vec::new();
		self.entries.retain(|key, entry| {
			let keep = now.elapsed_since(entry.timestamp) < timeout_ms;
			if !keep {
				removed.push(key.clone());
			}
			keep
		});
		removed
	}

	fn expired(&self, entry: &Entry, now: Timestamp) -> bool {
		match self.timeout_ms {
			Some(timeout_ms) => now.elapsed_since(entry.timestamp) >= timeout_ms,
			None => false,
		}
	}
}


// vim: ts=4
