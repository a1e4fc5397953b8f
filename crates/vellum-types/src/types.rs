//! Common identifiers used throughout the Vellum sync engine.

use rand::RngExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

use crate::error::{Error, VelResult};

// PeerId //
//********//

/// An unsigned 64-bit peer identifier, rendered as a decimal string on the
/// wire. Generated uniformly at random at repo construction unless the
/// application pins one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeerId(pub u64);

impl PeerId {
	pub fn random() -> PeerId {
		let mut rng = rand::rng();
		PeerId(rng.random())
	}

	/// Parse a decimal peer id string from an untrusted source.
	///
	/// Rejects empty strings, non-decimal characters, leading zeros (except
	/// the literal `"0"`), and values outside `0..2^64-1`.
	pub fn parse(s: &str) -> VelResult<PeerId> {
		if s.is_empty() {
			return Err(Error::CorruptPeerId("empty".into()));
		}
		if s.len() > 1 && s.starts_with('0') {
			return Err(Error::CorruptPeerId(format!("leading zero: {:?}", s)));
		}
		if !s.bytes().all(|b| b.is_ascii_digit()) {
			return Err(Error::CorruptPeerId(format!("not decimal: {:?}", s)));
		}
		let n = s
			.parse::<u64>()
			.map_err(|_| Error::CorruptPeerId(format!("out of range: {:?}", s)))?;
		Ok(PeerId(n))
	}
}

impl std::fmt::Display for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for PeerId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0.to_string())
	}
}

impl<'de> Deserialize<'de> for PeerId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		PeerId::parse(&s).map_err(serde::de::Error::custom)
	}
}

// DocId //
//*******//

/// Application-chosen opaque document name, globally unique.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Box<str>);

impl DocId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for DocId {
	fn from(s: &str) -> Self {
		DocId(s.into())
	}
}

impl From<String> for DocId {
	fn from(s: String) -> Self {
		DocId(s.into())
	}
}

impl std::fmt::Display for DocId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

// ChannelId //
//***********//

/// Monotonically increasing channel identifier, allocated by the channel
/// directory. Never reused within a process lifetime.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

// Identity //
//**********//

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
	User,
	Service,
}

/// The identity a peer presents during channel establishment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub peer_id: PeerId,
	pub name: Box<str>,
	#[serde(rename = "type")]
	pub kind: IdentityKind,
}

impl Identity {
	pub fn user(peer_id: PeerId, name: impl Into<Box<str>>) -> Identity {
		Identity { peer_id, name: name.into(), kind: IdentityKind::User }
	}

	pub fn service(peer_id: PeerId, name: impl Into<Box<str>>) -> Identity {
		Identity { peer_id, name: name.into(), kind: IdentityKind::Service }
	}
}

// ChannelKind //
//*************//

/// Whether a channel leads to a remote peer or to a storage backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
	Network,
	Storage,
}

// Timestamp //
//***********//

/// Wall-clock timestamp in milliseconds since the Unix epoch. Ephemeral
/// entry expiry is derived from these on the receiver side.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_millis() as i64)
	}

	/// Add milliseconds to this timestamp.
	pub fn add_millis(&self, millis: i64) -> Timestamp {
		Timestamp(self.0 + millis)
	}

	pub fn elapsed_since(&self, earlier: Timestamp) -> i64 {
		self.0 - earlier.0
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn peer_id_accepts_plain_decimal() {
		assert_eq!(PeerId::parse("0").unwrap(), PeerId(0));
		assert_eq!(PeerId::parse("100").unwrap(), PeerId(100));
		assert_eq!(
			PeerId::parse("18446744073709551615").unwrap(),
			PeerId(u64::MAX)
		);
	}

	#[test]
	fn peer_id_rejects_leading_zeros() {
		assert!(PeerId::parse("007").is_err());
		assert!(PeerId::parse("00").is_err());
	}

	#[test]
	fn peer_id_rejects_non_decimal() {
		assert!(PeerId::parse("").is_err());
		assert!(PeerId::parse("-1").is_err());
		assert!(PeerId::parse("12a").is_err());
		assert!(PeerId::parse("0x10").is_err());
		// 2^64, one past the maximum
		assert!(PeerId::parse("18446744073709551616").is_err());
	}

	#[test]
	fn peer_id_round_trips_as_string() {
		let id = PeerId(42);
		let json = serde_json::to_string(&id).unwrap();
		assert_eq!(json, "\"42\"");
		let back: PeerId = serde_json::from_str(&json).unwrap();
		assert_eq!(back, id);
	}
}

// vim: ts=4
