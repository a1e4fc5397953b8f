//! The channel message taxonomy: everything that travels between two
//! endpoints of a channel, in the order the sync protocol uses them.
//!
//! Messages are serialized as tagged maps with the compact binary object
//! encoding; CRDT payloads ride along as raw byte strings.

use serde::{Deserialize, Serialize};

use crate::types::{DocId, Identity, PeerId};
use crate::version::VersionVec;

/// One document entry inside a sync-request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncRequestEntry {
	pub doc_id: DocId,
	/// What the requester already has. Empty means nothing.
	pub requester_version: VersionVec,
}

/// Payload of a sync-response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transmission {
	/// Full document encoding.
	Snapshot {
		#[serde(with = "serde_bytes")]
		data: Vec<u8>,
		to_version: VersionVec,
	},
	/// Incremental encoding relative to the requester's version. A
	/// zero-length delta is legal.
	Update {
		#[serde(with = "serde_bytes")]
		data: Vec<u8>,
		to_version: VersionVec,
	},
	/// The responder has nothing to give for this document.
	Unavailable,
}

/// One peer's encoded ephemeral store for a single namespace.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EphemeralEnvelope {
	pub peer_id: PeerId,
	pub namespace: Box<str>,
	#[serde(with = "serde_bytes")]
	pub data: Vec<u8>,
}

/// A message addressed to one channel endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMsg {
	#[serde(rename = "channel/establish-request")]
	EstablishRequest { identity: Identity },

	#[serde(rename = "channel/establish-response")]
	EstablishResponse { identity: Identity },

	#[serde(rename = "channel/directory-request")]
	DirectoryRequest,

	#[serde(rename = "channel/directory-response")]
	DirectoryResponse { doc_ids: Vec<DocId> },

	#[serde(rename = "channel/sync-request")]
	SyncRequest { docs: Vec<SyncRequestEntry> },

	#[serde(rename = "channel/sync-response")]
	SyncResponse { doc_id: DocId, transmission: Transmission },

	#[serde(rename = "channel/ephemeral")]
	Ephemeral {
		doc_id: DocId,
		hops_remaining: u8,
		stores: Vec<EphemeralEnvelope>,
	},

	/// Atomic container for the messages one reducer pass queued to the
	/// same channel.
	#[serde(rename = "channel/batch")]
	Batch { messages: Vec<ChannelMsg> },
}

impl ChannelMsg {
	/// The outbound batcher's allow-list. Extend this match when a new
	/// variant is added; a batch never nests.
	pub fn batchable(&self) -> bool {
		match self {
			ChannelMsg::EstablishRequest { .. }
			| ChannelMsg::EstablishResponse { .. }
			| ChannelMsg::DirectoryRequest
			| ChannelMsg::DirectoryResponse { .. }
			| ChannelMsg::SyncRequest { .. }
			| ChannelMsg::SyncResponse { .. }
			| ChannelMsg::Ephemeral { .. } => true,
			ChannelMsg::Batch { .. } => false,
		}
	}

	/// True for the two handshake messages an unestablished channel is
	/// allowed to exchange.
	pub fn is_establishment(&self) -> bool {
		matches!(
			self,
			ChannelMsg::EstablishRequest { .. } | ChannelMsg::EstablishResponse { .. }
		)
	}

	/// Short label for log lines.
	pub fn label(&self) -> &'static str {
		match self {
			ChannelMsg::EstablishRequest { .. } => "establish-request",
			ChannelMsg::EstablishResponse { .. } => "establish-response",
			ChannelMsg::DirectoryRequest => "directory-request",
			ChannelMsg::DirectoryResponse { .. } => "directory-response",
			ChannelMsg::SyncRequest { .. } => "sync-request",
			ChannelMsg::SyncResponse { .. } => "sync-response",
			ChannelMsg::Ephemeral { .. } => "ephemeral",
			ChannelMsg::Batch { .. } => "batch",
		}
	}
}

impl Transmission {
	pub fn label(&self) -> &'static str {
		match self {
			Transmission::Snapshot { .. } => "snapshot",
			Transmission::Update { .. } => "update",
			Transmission::Unavailable => "unavailable",
		}
	}
}

// vim: ts=4
