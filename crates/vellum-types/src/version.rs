//! Version vectors as they travel on the wire and live in peer awareness.
//!
//! A `VersionVec` is the causal summary `peer → counter`. The engine-side
//! conversion to its native version vector type lives in the core crate;
//! everything here is pure map arithmetic, so awareness comparisons in the
//! reducer need no engine access.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{Error, VelResult};
use crate::types::PeerId;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVec(pub BTreeMap<PeerId, u64>);

impl VersionVec {
	pub fn new() -> VersionVec {
		VersionVec(BTreeMap::new())
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, peer: PeerId) -> u64 {
		self.0.get(&peer).copied().unwrap_or(0)
	}

	pub fn insert(&mut self, peer: PeerId, counter: u64) {
		self.0.insert(peer, counter);
	}

	/// Partial order over version vectors. `None` means concurrent.
	pub fn partial_cmp_vv(&self, other: &VersionVec) -> Option<Ordering> {
		let mut less = false;
		let mut greater = false;
		for (&peer, &counter) in &self.0 {
			match counter.cmp(&other.get(peer)) {
				Ordering::Less => less = true,
				Ordering::Greater => greater = true,
				Ordering::Equal => {}
			}
		}
		for (&peer, &counter) in &other.0 {
			if self.get(peer) < counter {
				less = true;
			}
		}
		match (less, greater) {
			(false, false) => Some(Ordering::Equal),
			(true, false) => Some(Ordering::Less),
			(false, true) => Some(Ordering::Greater),
			(true, true) => None,
		}
	}

	/// True when `self` covers everything `other` has seen.
	pub fn dominates(&self, other: &VersionVec) -> bool {
		matches!(
			self.partial_cmp_vv(other),
			Some(Ordering::Greater) | Some(Ordering::Equal)
		)
	}

	/// Per-peer maximum of two vectors: the least vector covering both.
	pub fn join(&self, other: &VersionVec) -> VersionVec {
		let mut merged = self.0.clone();
		for (&peer, &counter) in &other.0 {
			let slot = merged.entry(peer).or_insert(0);
			*slot = (*slot).max(counter);
		}
		VersionVec(merged)
	}

	/// URL-safe storage key tag for the persisted-delta layout: base64 of
	/// the JSON rendering of the map. Deterministic because the underlying
	/// map is ordered.
	pub fn version_tag(&self) -> String {
		let json = serde_json::to_string(&self.0).unwrap_or_default();
		URL_SAFE_NO_PAD.encode(json.as_bytes())
	}

	/// Recover a version vector from a `version_tag`.
	pub fn from_version_tag(tag: &str) -> VelResult<VersionVec> {
		let json = URL_SAFE_NO_PAD
			.decode(tag.as_bytes())
			.map_err(|err| Error::Decode(format!("version tag base64: {}", err)))?;
		let map = serde_json::from_slice(&json)
			.map_err(|err| Error::Decode(format!("version tag json: {}", err)))?;
		Ok(VersionVec(map))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vv(entries: &[(u64, u64)]) -> VersionVec {
		VersionVec(entries.iter().map(|&(p, c)| (PeerId(p), c)).collect())
	}

	#[test]
	fn equal_vectors() {
		assert_eq!(
			vv(&[(1, 2), (2, 3)]).partial_cmp_vv(&vv(&[(1, 2), (2, 3)])),
			Some(Ordering::Equal)
		);
		// missing entries count as zero
		assert_eq!(
			vv(&[(1, 2), (2, 0)]).partial_cmp_vv(&vv(&[(1, 2)])),
			Some(Ordering::Equal)
		);
	}

	#[test]
	fn dominating_vector_is_greater() {
		assert_eq!(
			vv(&[(1, 3), (2, 3)]).partial_cmp_vv(&vv(&[(1, 2), (2, 3)])),
			Some(Ordering::Greater)
		);
		assert_eq!(
			vv(&[(1, 1)]).partial_cmp_vv(&vv(&[(1, 1), (2, 4)])),
			Some(Ordering::Less)
		);
	}

	#[test]
	fn concurrent_vectors_are_unordered() {
		assert_eq!(vv(&[(1, 3)]).partial_cmp_vv(&vv(&[(2, 1)])), None);
		assert!(!vv(&[(1, 3)]).dominates(&vv(&[(2, 1)])));
	}

	#[test]
	fn join_takes_per_peer_maximum() {
		let joined = vv(&[(1, 3), (2, 1)]).join(&vv(&[(1, 2), (3, 5)]));
		assert_eq!(joined, vv(&[(1, 3), (2, 1), (3, 5)]));
		assert!(joined.dominates(&vv(&[(1, 3), (2, 1)])));
		assert!(joined.dominates(&vv(&[(1, 2), (3, 5)])));
	}

	#[test]
	fn version_tag_round_trip() {
		let v = vv(&[(100, 7), (200, 1)]);
		let tag = v.version_tag();
		assert!(!tag.contains('/'));
		assert!(!tag.contains('+'));
		assert_eq!(VersionVec::from_version_tag(&tag).unwrap(), v);
	}

	#[test]
	fn version_tag_orders_with_growth() {
		// tags only need to be distinct and deterministic; lexicographic
		// replay order must at least keep identical vectors identical
		let a = vv(&[(1, 1)]);
		let b = vv(&[(1, 1)]);
		assert_eq!(a.version_tag(), b.version_tag());
	}
}

// vim: ts=4
