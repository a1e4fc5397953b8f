//! Transport-layer frame encoding.
//!
//! Layout: one framing-version byte (currently `0`), then a frame kind:
//!
//! ```text
//! 0x01  single    <payload_len: uleb128> <payload>
//! 0x02  fragment  <fragment_id: uleb128> <index: uleb128>
//!                 <total_fragments: uleb128> <payload_len: uleb128> <payload>
//! ```
//!
//! All varints are unsigned LEB128. Values that would overflow a u64 are
//! rejected as decode errors.

use vellum_types::error::{Error, VelResult};

pub const FRAMING_VERSION: u8 = 0;

const KIND_SINGLE: u8 = 0x01;
const KIND_FRAGMENT: u8 = 0x02;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
	Single { payload: Vec<u8> },
	Fragment { fragment_id: u64, index: u64, total_fragments: u64, payload: Vec<u8> },
}

/// Encode a payload that fits in one transport message.
pub fn encode_single(payload: &[u8]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(payload.len() + 12);
	buf.push(FRAMING_VERSION);
	buf.push(KIND_SINGLE);
	write_uleb(&mut buf, payload.len() as u64);
	buf.extend_from_slice(payload);
	buf
}

/// Split a payload into fragment frames of at most `max_payload` bytes each.
/// Always produces at least one frame; a payload within the limit still gets
/// a single frame instead.
pub fn encode_fragments(payload: &[u8], max_payload: usize, fragment_id: u64) -> Vec<Vec<u8>> {
	if payload.len() <= max_payload {
		return vec![encode_single(payload)];
	}
	let chunks: Vec<&[u8]> = payload.chunks(max_payload).collect();
	let total = chunks.len() as u64;
	chunks
		.iter()
		.enumerate()
		.map(|(index, chunk)| {
			let mut buf = Vec::with_capacity(chunk.len() + 24);
			buf.push(FRAMING_VERSION);
			buf.push(KIND_FRAGMENT);
			write_uleb(&mut buf, fragment_id);
			write_uleb(&mut buf, index as u64);
			write_uleb(&mut buf, total);
			write_uleb(&mut buf, chunk.len() as u64);
			buf.extend_from_slice(chunk);
			buf
		})
		.collect()
}

pub fn decode_frame(bytes: &[u8]) -> VelResult<Frame> {
	let mut rest = bytes;
	let version = take_byte(&mut rest, "framing version")?;
	if version != FRAMING_VERSION {
		return Err(Error::Decode(format!("unsupported framing version {}", version)));
	}
	match take_byte(&mut rest, "frame kind")? {
		KIND_SINGLE => {
			let len = read_uleb(&mut rest)?;
			let payload = take_payload(&mut rest, len)?;
			if !rest.is_empty() {
				return Err(Error::Decode("trailing bytes after frame".into()));
			}
			Ok(Frame::Single { payload })
		}
		KIND_FRAGMENT => {
			let fragment_id = read_uleb(&mut rest)?;
			let index = read_uleb(&mut rest)?;
			let total_fragments = read_uleb(&mut rest)?;
			let len = read_uleb(&mut rest)?;
			let payload = take_payload(&mut rest, len)?;
			if !rest.is_empty() {
				return Err(Error::Decode("trailing bytes after fragment".into()));
			}
			if total_fragments == 0 {
				return Err(Error::Decode("fragment with zero total".into()));
			}
			if index >= total_fragments {
				return Err(Error::Decode(format!(
					"fragment index {} out of range ({} total)",
					index, total_fragments
				)));
			}
			Ok(Frame::Fragment { fragment_id, index, total_fragments, payload })
		}
		kind => Err(Error::Decode(format!("unknown frame kind 0x{:02x}", kind))),
	}
}

fn write_uleb(buf: &mut Vec<u8>, value: u64) {
	// infallible on Vec
	let _ = leb128::write::unsigned(buf, value);
}

fn read_uleb(rest: &mut &[u8]) -> VelResult<u64> {
	leb128::read::unsigned(rest).map_err(|err| Error::Decode(format!("uleb128: {}", err)))
}

fn take_byte(rest: &mut &[u8], what: &str) -> VelResult<u8> {
	match rest.split_first() {
		Some((&b, tail)) => {
			*rest = tail;
			Ok(b)
		}
		None => Err(Error::Decode(format!("truncated frame: missing {}", what))),
	}
}

fn take_payload(rest: &mut &[u8], len: u64) -> VelResult<Vec<u8>> {
	let len = usize::try_from(len)
		.map_err(|_| Error::Decode(format!("payload length {} exceeds address space", len)))?;
	if rest.len() < len {
		return Err(Error::Decode(format!(
			"truncated payload: want {} bytes, have {}",
			len,
			rest.len()
		)));
	}
	let (payload, tail) = rest.split_at(len);
	*rest = tail;
	Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_frame_round_trip() {
		let payload = b"hello frame".to_vec();
		let frame = encode_single(&payload);
		assert_eq!(decode_frame(&frame).unwrap(), Frame::Single { payload });
	}

	#[test]
	fn empty_payload_round_trip() {
		let frame = encode_single(&[]);
		assert_eq!(decode_frame(&frame).unwrap(), Frame::Single { payload: vec![] });
	}

	#[test]
	fn fragments_cover_whole_payload() {
		let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
		let frames = encode_fragments(&payload, 300, 7);
		assert_eq!(frames.len(), 4);

		let mut collected = vec![Vec::new(); 4];
		for frame in &frames {
			match decode_frame(frame).unwrap() {
				Frame::Fragment { fragment_id, index, total_fragments, payload } => {
					assert_eq!(fragment_id, 7);
					assert_eq!(total_fragments, 4);
					collected[index as usize] = payload;
				}
				Frame::Single { .. } => panic!("expected fragment"),
			}
		}
		assert_eq!(collected.concat(), payload);
	}

	#[test]
	fn small_payload_is_not_fragmented() {
		let frames = encode_fragments(b"tiny", 64, 1);
		assert_eq!(frames.len(), 1);
		assert!(matches!(decode_frame(&frames[0]).unwrap(), Frame::Single { .. }));
	}

	#[test]
	fn rejects_bad_version_and_kind() {
		assert!(decode_frame(&[9, KIND_SINGLE, 0]).is_err());
		assert!(decode_frame(&[FRAMING_VERSION, 0x7f, 0]).is_err());
		assert!(decode_frame(&[]).is_err());
		assert!(decode_frame(&[FRAMING_VERSION]).is_err());
	}

	#[test]
	fn rejects_truncated_payload() {
		let mut frame = encode_single(b"hello frame");
		frame.truncate(frame.len() - 3);
		assert!(decode_frame(&frame).is_err());
	}

	#[test]
	fn rejects_trailing_bytes() {
		let mut frame = encode_single(b"x");
		frame.push(0);
		assert!(decode_frame(&frame).is_err());
	}

	#[test]
	fn rejects_uleb_overflow() {
		// 10 continuation bytes push the accumulated shift past 64 bits
		let mut frame = vec![FRAMING_VERSION, KIND_SINGLE];
		frame.extend_from_slice(&[0xff; 10]);
		frame.push(0x7f);
		assert!(matches!(decode_frame(&frame), Err(Error::Decode(_))));
	}

	#[test]
	fn rejects_out_of_range_fragment_index() {
		let mut frame = vec![FRAMING_VERSION, KIND_FRAGMENT];
		let _ = leb128::write::unsigned(&mut frame, 1); // fragment_id
		let _ = leb128::write::unsigned(&mut frame, 5); // index
		let _ = leb128::write::unsigned(&mut frame, 2); // total
		let _ = leb128::write::unsigned(&mut frame, 0); // len
		assert!(decode_frame(&frame).is_err());
	}
}

// vim: ts=4
