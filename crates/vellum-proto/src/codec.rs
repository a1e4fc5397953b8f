//! Binary channel message codec.
//!
//! Messages are self-describing CBOR: every variant is a map tagged with a
//! `type` field, CRDT payloads are raw byte strings. Decode failures never
//! yield partial messages.

use vellum_types::error::{Error, VelResult};
use vellum_types::message::ChannelMsg;

pub fn encode_msg(msg: &ChannelMsg) -> VelResult<Vec<u8>> {
	let mut buf = Vec::new();
	ciborium::ser::into_writer(msg, &mut buf)
		.map_err(|err| Error::Internal(format!("message encode: {}", err)))?;
	Ok(buf)
}

pub fn decode_msg(bytes: &[u8]) -> VelResult<ChannelMsg> {
	ciborium::de::from_reader(bytes).map_err(|err| Error::Decode(format!("message: {}", err)))
}


// vim: ts=4
