//! Fragment reassembly for one logical connection.
//!
//! Fragments are grouped by `fragment_id`; indices may arrive in any order
//! and duplicates are ignored. A group that sees no new fragment within the
//! timeout is stale: the next fragment for it fails with `StaleFragments`
//! and the group is discarded, so a lost fragment cannot pin memory forever.

use std::collections::HashMap;
use tracing::debug;

use vellum_types::error::{Error, VelResult};
use vellum_types::types::Timestamp;

use crate::frame::{Frame, decode_frame};

pub const DEFAULT_TIMEOUT_MS: i64 = 60_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reassembly {
	/// A full payload is available.
	Complete(Vec<u8>),
	/// The fragment was absorbed; more are needed.
	Pending,
}

#[derive(Debug)]
struct Group {
	total_fragments: u64,
	parts: HashMap<u64, Vec<u8>>,
	last_activity: Timestamp,
}

/// Reassembles the byte stream of a single logical connection.
#[derive(Debug)]
pub struct Reassembler {
	groups: HashMap<u64, Group>,
	timeout_ms: i64,
}

impl Default for Reassembler {
	fn default() -> Self {
		Reassembler::new(DEFAULT_TIMEOUT_MS)
	}
}

impl Reassembler {
	pub fn new(timeout_ms: i64) -> Reassembler {
		Reassembler { groups: HashMap::new(), timeout_ms }
	}

	/// Feed one raw transport message.
	pub fn accept(&mut self, bytes: &[u8]) -> VelResult<Reassembly> {
		self.accept_at(bytes, Timestamp::now())
	}

	/// Clock-injected variant of [`accept`](Self::accept), used by tests and
	/// by transports that batch their polling.
	pub fn accept_at(&mut self, bytes: &[u8], now: Timestamp) -> VelResult<Reassembly> {
		match decode_frame(bytes)? {
			Frame::Single { payload } => Ok(Reassembly::Complete(payload)),
			Frame::Fragment { fragment_id, index, total_fragments, payload } => {
				self.accept_fragment(fragment_id, index, total_fragments, payload, now)
			}
		}
	}

	fn accept_fragment(
		&mut self,
		fragment_id: u64,
		index: u64,
		total_fragments: u64,
		payload: Vec<u8>,
		now: Timestamp,
	) -> VelResult<Reassembly> {
		if let Some(group) = self.groups.get(&fragment_id) {
			if now.elapsed_since(group.last_activity) > self.timeout_ms {
				self.groups.remove(&fragment_id);
				return Err(Error::StaleFragments);
			}
			if group.total_fragments != total_fragments {
				let prev_total = group.total_fragments;
				self.groups.remove(&fragment_id);
				return Err(Error::Decode(format!(
					"fragment group {} changed total from {} to {}",
					fragment_id, prev_total, total_fragments
				)));
			}
		}

		let group = self.groups.entry(fragment_id).or_insert_with(|| Group {
			total_fragments,
			parts: HashMap::new(),
			last_activity: now,
		});
		group.last_activity = now;
		// duplicate indices are ignored
		group.parts.entry(index).or_insert(payload);

		if group.parts.len() as u64 == total_fragments {
			let group = match self.groups.remove(&fragment_id) {
				Some(group) => group,
				None => return Err(Error::Internal("fragment group vanished".into())),
			};
			let mut data = Vec::new();
			for index in 0..total_fragments {
				match group.parts.get(&index) {
					Some(part) => data.extend_from_slice(part),
					None => {
						return Err(Error::Decode(format!(
							"fragment group {} missing index {}",
							fragment_id, index
						)));
					}
				}
			}
			debug!("reassembled fragment group {} ({} bytes)", fragment_id, data.len());
			Ok(Reassembly::Complete(data))
		} else {
			Ok(Reassembly::Pending)
		}
	}

	/// Drop groups that have not seen activity since the timeout. Transports
	/// call this from their housekeeping tick.
	pub fn sweep(&mut self, now: Timestamp) {
		let timeout_ms = self.timeout_ms;
		self.groups.retain(|fragment_id, group| {
			let keep = now.elapsed_since(group.last_activity) <= timeout_ms;
			if !keep {
				debug!("dropping stale fragment group {}", fragment_id);
			}
			keep
		});
	}

	pub fn pending_groups(&self) -> usize {
		self.groups.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::{encode_fragments, encode_single};

	#[test]
	fn single_frame_completes_immediately() {
		let mut reassembler = Reassembler::default();
		let result = reassembler.accept(&encode_single(b"payload")).unwrap();
		assert_eq!(result, Reassembly::Complete(b"payload".to_vec()));
	}

	#[test]
	fn out_of_order_fragments_reassemble() {
		let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
		let frames = encode_fragments(&payload, 1024, 3);
		assert_eq!(frames.len(), 5);

		let mut reassembler = Reassembler::default();
		for index in [3usize, 1, 0, 4] {
			assert_eq!(reassembler.accept(&frames[index]).unwrap(), Reassembly::Pending);
		}
		assert_eq!(
			reassembler.accept(&frames[2]).unwrap(),
			Reassembly::Complete(payload)
		);
		assert_eq!(reassembler.pending_groups(), 0);
	}

	#[test]
	fn duplicate_fragments_are_ignored() {
		let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
		let frames = encode_fragments(&payload, 128, 1);
		assert_eq!(frames.len(), 3);

		let mut reassembler = Reassembler::default();
		assert_eq!(reassembler.accept(&frames[0]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames[0]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames[1]).unwrap(), Reassembly::Pending);
		assert_eq!(
			reassembler.accept(&frames[2]).unwrap(),
			Reassembly::Complete(payload)
		);
	}

	#[test]
	fn interleaved_groups_keep_apart() {
		let a: Vec<u8> = vec![1; 600];
		let b: Vec<u8> = vec![2; 600];
		let frames_a = encode_fragments(&a, 256, 10);
		let frames_b = encode_fragments(&b, 256, 11);

		let mut reassembler = Reassembler::default();
		assert_eq!(reassembler.accept(&frames_a[0]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames_b[0]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames_a[1]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames_b[1]).unwrap(), Reassembly::Pending);
		assert_eq!(reassembler.accept(&frames_a[2]).unwrap(), Reassembly::Complete(a));
		assert_eq!(reassembler.accept(&frames_b[2]).unwrap(), Reassembly::Complete(b));
	}

	#[test]
	fn stale_group_fails_with_stale_fragments() {
		let payload: Vec<u8> = vec![7; 600];
		let frames = encode_fragments(&payload, 256, 5);

		let mut reassembler = Reassembler::new(60_000);
		let t0 = Timestamp(1_000_000);
		assert_eq!(
			reassembler.accept_at(&frames[0], t0).unwrap(),
			Reassembly::Pending
		);
		let late = t0.add_millis(61_000);
		assert!(matches!(
			reassembler.accept_at(&frames[1], late),
			Err(Error::StaleFragments)
		));
		assert_eq!(reassembler.pending_groups(), 0);
	}

	#[test]
	fn mismatched_total_is_a_decode_error() {
		let mut reassembler = Reassembler::default();
		let frames = encode_fragments(&vec![0; 600], 256, 9);
		assert_eq!(reassembler.accept(&frames[0]).unwrap(), Reassembly::Pending);

		// hand-build a fragment for the same group with a different total
		let mut rogue = vec![crate::frame::FRAMING_VERSION, 0x02];
		let _ = leb128::write::unsigned(&mut rogue, 9); // fragment_id
		let _ = leb128::write::unsigned(&mut rogue, 1); // index
		let _ = leb128::write::unsigned(&mut rogue, 7); // total (was 3)
		let _ = leb128::write::unsigned(&mut rogue, 0); // len
		assert!(matches!(reassembler.accept(&rogue), Err(Error::Decode(_))));
	}

	#[test]
	fn sweep_discards_idle_groups() {
		let frames = encode_fragments(&vec![0; 600], 256, 2);
		let mut reassembler = Reassembler::new(60_000);
		let t0 = Timestamp(0);
		assert_eq!(
			reassembler.accept_at(&frames[0], t0).unwrap(),
			Reassembly::Pending
		);
		reassembler.sweep(t0.add_millis(61_000));
		assert_eq!(reassembler.pending_groups(), 0);
	}
}

// vim: ts=4
