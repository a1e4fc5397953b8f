//! Wire framing, binary message codec, and fragment reassembly.
//!
//! The transport boundary of the sync engine: channel messages are encoded
//! with a compact binary object encoding (tagged maps, raw byte strings for
//! CRDT payloads), wrapped in a length-prefixed frame, and, when a
//! transport caps its message size, split into fragments that the receiver
//! reassembles. Transports treat the resulting bytes as opaque.

pub mod codec;
pub mod frame;
pub mod reassembler;

pub use codec::{decode_msg, encode_msg};
pub use frame::{Frame, decode_frame, encode_fragments, encode_single};
pub use reassembler::{Reassembler, Reassembly};

// vim: ts=4
