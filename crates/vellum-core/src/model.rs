//! The synchronizer model: channels, peers, documents, ephemeral stores.
//!
//! The model exclusively owns this state. Cross-references between peers,
//! channels and documents are relational: ids, looked up through the model,
//! never direct links.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use vellum_types::permissions::{PermissionCtx, Permissions};

use crate::channels::{ChannelDirectory, ChannelState};
use crate::doc::{Doc, SharedDoc};
use crate::ephemeral::{self, EphemeralStore};
use crate::prelude::*;

/// Tunables for one repo instance.
#[derive(Clone, Debug)]
pub struct SyncConfig {
	/// Receiver-side expiry window for peer ephemeral entries.
	pub ephemeral_timeout_ms: i64,
	/// Interval of the heartbeat tick that re-broadcasts ephemeral state.
	pub heartbeat_interval_ms: u64,
	/// Fragment reassembly group expiry.
	pub reassembly_timeout_ms: i64,
	/// Hop budget on forwarded ephemeral messages.
	pub forward_hops: u8,
	/// Payload size above which outbound frames are fragmented.
	pub max_frame_payload: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		SyncConfig {
			ephemeral_timeout_ms: ephemeral::DEFAULT_TIMEOUT_MS,
			heartbeat_interval_ms: 10_000,
			reassembly_timeout_ms: 60_000,
			forward_hops: 2,
			max_frame_payload: 256 * 1024,
		}
	}
}

/// What we know about one remote peer, across all of its channels.
#[derive(Debug)]
pub struct PeerState {
	pub identity: Identity,
	/// Documents this peer asked to receive updates for.
	pub subscriptions: HashSet<DocId>,
	/// Our best knowledge of what the peer already has, per document. Used
	/// to suppress echo and to size update exports.
	pub awareness: HashMap<DocId, VersionVec>,
	/// Established channels reaching this peer, in allocation order.
	pub channels: BTreeSet<ChannelId>,
}

impl PeerState {
	fn new(identity: Identity) -> PeerState {
		PeerState {
			identity,
			subscriptions: HashSet::new(),
			awareness: HashMap::new(),
			channels: BTreeSet::new(),
		}
	}
}

/// A locally held document.
#[derive(Debug)]
pub struct DocState {
	pub doc: SharedDoc,
	/// True once the application asked for this document. Placeholder docs
	/// created while probing storage on a peer's behalf stay false and may
	/// be dropped again when storage comes up empty.
	pub app_ensured: bool,
}

/// The two store variants for one `(doc, namespace)` pair.
#[derive(Debug)]
pub struct NamespaceStores {
	/// Our own entries; timerless.
	pub own: EphemeralStore,
	/// Entries received from peers; expiring.
	pub remote: EphemeralStore,
}

impl NamespaceStores {
	pub fn new(timeout_ms: i64) -> NamespaceStores {
		NamespaceStores {
			own: EphemeralStore::timerless(),
			remote: EphemeralStore::expiring(timeout_ms),
		}
	}
}

/// An unanswered sync-request for a document we are still fetching from
/// storage on the requester's behalf.
#[derive(Debug)]
pub struct PendingFetch {
	pub requesters: Vec<(ChannelId, VersionVec)>,
	/// Storage channels that have not answered yet.
	pub outstanding: usize,
}

pub struct Model {
	pub identity: Identity,
	pub config: SyncConfig,
	pub permissions: Permissions,
	pub directory: ChannelDirectory,
	pub peers: HashMap<PeerId, PeerState>,
	pub documents: HashMap<DocId, DocState>,
	pub ephemeral: HashMap<DocId, HashMap<Box<str>, NamespaceStores>>,
	pub pending_fetches: HashMap<DocId, PendingFetch>,
}

impl Model {
	pub fn new(identity: Identity, permissions: Permissions, config: SyncConfig) -> Model {
		Model {
			identity,
			config,
			permissions,
			directory: ChannelDirectory::new(),
			peers: HashMap::new(),
			documents: HashMap::new(),
			ephemeral: HashMap::new(),
			pending_fetches: HashMap::new(),
		}
	}

	/// Record or refresh a peer after identity exchange on a channel.
	pub fn ensure_peer(&mut self, identity: Identity, channel_id: ChannelId) -> &mut PeerState {
		let peer = self
			.peers
			.entry(identity.peer_id)
			.or_insert_with(|| PeerState::new(identity.clone()));
		peer.identity = identity;
		peer.channels.insert(channel_id);
		peer
	}

	/// The peer an established channel leads to.
	pub fn peer_of_channel(&self, channel_id: ChannelId) -> Option<PeerId> {
		match self.directory.get(channel_id)?.state {
			ChannelState::Established { peer_id } => Some(peer_id),
			ChannelState::Unestablished => None,
		}
	}

	/// Pick the send channel for a peer: the oldest established one.
	pub fn send_channel(&self, peer_id: PeerId) -> Option<ChannelId> {
		let peer = self.peers.get(&peer_id)?;
		peer.channels
			.iter()
			.copied()
			.find(|&id| self.directory.get(id).is_some_and(|c| c.is_established()))
	}

	/// All established storage channels.
	pub fn storage_channels(&self) -> Vec<ChannelId> {
		self.directory
			.iter()
			.filter(|c| c.kind == ChannelKind::Storage && c.is_established())
			.map(|c| c.id)
			.collect()
	}

	/// Established network channels of peers subscribed to `doc_id`, one per
	/// peer. Used for ephemeral fan-out.
	pub fn subscribed_network_channels(&self, doc_id: &DocId) -> Vec<ChannelId> {
		self.peers
			.iter()
			.filter(|(_, peer)| peer.subscriptions.contains(doc_id))
			.filter_map(|(&peer_id, _)| {
				let channel_id = self.send_channel(peer_id)?;
				let channel = self.directory.get(channel_id)?;
				(channel.kind == ChannelKind::Network).then_some(channel_id)
			})
			.collect()
	}

	pub fn doc(&self, doc_id: &DocId) -> Option<&SharedDoc> {
		self.documents.get(doc_id).map(|state| &state.doc)
	}

	/// Insert a fresh document owned by our identity.
	pub fn create_doc(&mut self, doc_id: &DocId, app_ensured: bool) -> VelResult<SharedDoc> {
		let doc = Arc::new(Doc::new(self.identity.peer_id)?);
		self.documents
			.insert(doc_id.clone(), DocState { doc: doc.clone(), app_ensured });
		Ok(doc)
	}

	/// Ephemeral stores for one `(doc, namespace)`, created on first use.
	pub fn namespace_stores(&mut self, doc_id: &DocId, namespace: &str) -> &mut NamespaceStores {
		let timeout_ms = self.config.ephemeral_timeout_ms;
		self.ephemeral
			.entry(doc_id.clone())
			.or_default()
			.entry(namespace.into())
			.or_insert_with(|| NamespaceStores::new(timeout_ms))
	}

	/// Namespaces that carry own entries for a document, for heartbeats.
	pub fn own_namespaces(&self, doc_id: &DocId) -> Vec<Box<str>> {
		match self.ephemeral.get(doc_id) {
			Some(namespaces) => namespaces
				.iter()
				.filter(|(_, stores)| !stores.own.is_empty())
				.map(|(namespace, _)| namespace.clone())
				.collect(),
			None => Vec::new(),
		}
	}

	/// Documents that have anything to heartbeat.
	pub fn docs_with_own_ephemeral(&self) -> Vec<DocId> {
		self.ephemeral
			.iter()
			.filter(|(_, namespaces)| namespaces.values().any(|s| !s.own.is_empty()))
			.map(|(doc_id, _)| doc_id.clone())
			.collect()
	}

	pub fn can_reveal(&self, peer: &Identity, doc_id: &DocId, kind: ChannelKind) -> bool {
		self.permissions
			.can_reveal(&PermissionCtx { peer, doc_id, channel_kind: kind })
	}

	pub fn can_update(&self, peer: &Identity, doc_id: &DocId, kind: ChannelKind) -> bool {
		self.permissions
			.can_update(&PermissionCtx { peer, doc_id, channel_kind: kind })
	}
}

impl std::fmt::Debug for Model {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Model")
			.field("identity", &self.identity)
			.field("channels", &self.directory.len())
			.field("peers", &self.peers.len())
			.field("documents", &self.documents.len())
			.finish()
	}
}

// vim: ts=4
