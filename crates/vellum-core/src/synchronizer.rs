//! The synchronizer state machine.
//!
//! `update` is the pure reducer: `(model, message, now) → command`. It never
//! performs I/O and never returns an error; failures become log commands and
//! response messages. All side effects (sends, CRDT imports, ephemeral
//! encodes, subscriptions) are expressed as [`Command`] values the executor
//! interprets.

use vellum_types::message::{ChannelMsg, SyncRequestEntry, Transmission};

use crate::channels::ChannelState;
use crate::doc::Doc;
use crate::model::{Model, PendingFetch};
use crate::prelude::*;

/// Internal synchronizer messages, dispatched by the executor, adapters (via
/// the executor's queue), timers, and the application façade.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMsg {
	/// A channel record was created in the directory.
	ChannelAdded { channel_id: ChannelId },
	/// A channel is gone (adapter fault or orderly close).
	ChannelRemoved { channel_id: ChannelId },
	/// Start the handshake on a channel we initiate.
	EstablishChannel { channel_id: ChannelId },
	/// A decoded message arrived from a channel.
	Inbound { channel_id: ChannelId, msg: ChannelMsg },
	/// The application wants this document held locally.
	EnsureDoc { doc_id: DocId },
	/// The local-update subscription fired after a commit.
	LocalDocChange { doc_id: DocId },
	/// A CRDT import from `from_peer` succeeded.
	DocImported { doc_id: DocId, from_peer: PeerId },
	/// Drop a document from the registry and from storage.
	DeleteDoc { doc_id: DocId },
	/// Periodic ephemeral re-broadcast tick.
	Heartbeat,
	/// The application set its own ephemeral value for a namespace.
	SetEphemeral { doc_id: DocId, namespace: Box<str>, data: Vec<u8> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

/// Side effects requested by the reducer, interpreted by the executor.
#[derive(Debug, PartialEq)]
pub enum Command {
	/// Queue a message through the outbound batcher.
	Send { channel_id: ChannelId, msg: ChannelMsg },
	/// Send immediately, bypassing the batcher (handshake latency).
	SendEstablishment { channel_id: ChannelId, msg: ChannelMsg },
	/// Install the local-update subscription for a document.
	SubscribeDoc { doc_id: DocId },
	/// Drop the local-update subscription and registry entry.
	UnsubscribeDoc { doc_id: DocId },
	/// Apply CRDT bytes; dispatch `DocImported` on success.
	ImportDocData { doc_id: DocId, from_peer: PeerId, data: Vec<u8> },
	/// Macro: broadcast every namespace of the listed documents.
	BroadcastEphemeralBatch {
		doc_ids: Vec<DocId>,
		hops_remaining: u8,
		to_channel: Option<ChannelId>,
	},
	/// Broadcast one namespace to the listed channels, timestamps refreshed.
	BroadcastEphemeralNamespace {
		doc_id: DocId,
		namespace: Box<str>,
		hops_remaining: u8,
		to_channels: Vec<ChannelId>,
	},
	/// Merge a received ephemeral delta into the expiring store.
	ApplyEphemeral { doc_id: DocId, namespace: Box<str>, from_peer: PeerId, data: Vec<u8> },
	/// Tell storage drivers to forget a document.
	RemoveDocFromStorage { doc_id: DocId },
	/// Re-enter the reducer.
	Dispatch { msg: Box<SyncMsg> },
	Batch { commands: Vec<Command> },
	Log { level: LogLevel, message: String },
}

fn log(level: LogLevel, message: impl Into<String>) -> Command {
	Command::Log { level, message: message.into() }
}

fn batch(mut commands: Vec<Command>) -> Option<Command> {
	match commands.len() {
		0 => None,
		1 => commands.pop(),
		_ => Some(Command::Batch { commands }),
	}
}

/// The pure update function. `now` is injected so ephemeral writes stay
/// deterministic under test clocks.
pub fn update(model: &mut Model, msg: SyncMsg, now: Timestamp) -> Option<Command> {
	match msg {
		SyncMsg::ChannelAdded { channel_id } => {
			let Some(channel) = model.directory.get(channel_id) else {
				return Some(log(LogLevel::Warn, format!("added unknown channel {}", channel_id)));
			};
			if channel.initiate {
				Some(Command::Dispatch {
					msg: Box::new(SyncMsg::EstablishChannel { channel_id }),
				})
			} else {
				Some(log(
					LogLevel::Debug,
					format!("channel {} added, awaiting establishment", channel_id),
				))
			}
		}

		SyncMsg::EstablishChannel { channel_id } => {
			if model.directory.get(channel_id).is_none() {
				return Some(log(
					LogLevel::Warn,
					format!("cannot establish unknown channel {}", channel_id),
				));
			}
			Some(Command::SendEstablishment {
				channel_id,
				msg: ChannelMsg::EstablishRequest { identity: model.identity.clone() },
			})
		}

		SyncMsg::ChannelRemoved { channel_id } => {
			let Some(channel) = model.directory.remove(channel_id) else {
				return None;
			};
			if let ChannelState::Established { peer_id } = channel.state {
				if let Some(peer) = model.peers.get_mut(&peer_id) {
					peer.channels.remove(&channel_id);
				}
			}
			Some(log(LogLevel::Debug, format!("channel {} removed", channel_id)))
		}

		SyncMsg::Inbound { channel_id, msg } => batch(handle_inbound(model, channel_id, msg)),

		SyncMsg::EnsureDoc { doc_id } => ensure_doc(model, doc_id),

		SyncMsg::LocalDocChange { doc_id } => batch(fan_out(model, &doc_id, None)),

		SyncMsg::DocImported { doc_id, from_peer } => {
			let Some(doc) = model.doc(&doc_id).cloned() else {
				return Some(log(
					LogLevel::Warn,
					format!("import completed for unknown doc {}", doc_id),
				));
			};
			let ours = doc.version();
			if let Some(peer) = model.peers.get_mut(&from_peer) {
				peer.awareness.insert(doc_id.clone(), ours);
			}
			model.pending_fetches.remove(&doc_id);
			batch(fan_out(model, &doc_id, Some(from_peer)))
		}

		SyncMsg::DeleteDoc { doc_id } => {
			if model.documents.remove(&doc_id).is_none() {
				return Some(log(LogLevel::Debug, format!("delete of unknown doc {}", doc_id)));
			}
			model.ephemeral.remove(&doc_id);
			model.pending_fetches.remove(&doc_id);
			batch(vec![
				Command::UnsubscribeDoc { doc_id: doc_id.clone() },
				Command::RemoveDocFromStorage { doc_id: doc_id.clone() },
				log(LogLevel::Info, format!("doc {} deleted", doc_id)),
			])
		}

		SyncMsg::Heartbeat => {
			let doc_ids = model.docs_with_own_ephemeral();
			if doc_ids.is_empty() {
				return None;
			}
			Some(Command::BroadcastEphemeralBatch {
				doc_ids,
				hops_remaining: model.config.forward_hops,
				to_channel: None,
			})
		}

		SyncMsg::SetEphemeral { doc_id, namespace, data } => {
			if !model.documents.contains_key(&doc_id) {
				return Some(log(
					LogLevel::Warn,
					format!("ephemeral write for unknown doc {}", doc_id),
				));
			}
			let key = model.identity.peer_id.to_string();
			model.namespace_stores(&doc_id, &namespace).own.set(key, data, now);
			let to_channels = model.subscribed_network_channels(&doc_id);
			Some(Command::BroadcastEphemeralNamespace {
				doc_id,
				namespace,
				hops_remaining: model.config.forward_hops,
				to_channels,
			})
		}
	}
}

fn handle_inbound(model: &mut Model, channel_id: ChannelId, msg: ChannelMsg) -> Vec<Command> {
	let Some(channel) = model.directory.get(channel_id) else {
		return vec![log(
			LogLevel::Warn,
			format!("message on unknown channel {}", channel_id),
		)];
	};
	if !channel.is_established() && !msg.is_establishment() {
		return vec![log(
			LogLevel::Warn,
			format!("ignoring {} on unestablished channel {}", msg.label(), channel_id),
		)];
	}

	match msg {
		ChannelMsg::EstablishRequest { identity } => establish(model, channel_id, identity, true),
		ChannelMsg::EstablishResponse { identity } => {
			establish(model, channel_id, identity, false)
		}

		ChannelMsg::DirectoryRequest => {
			let Some((peer_identity, kind)) = channel_peer_identity(model, channel_id) else {
				return Vec::new();
			};
			let mut doc_ids: Vec<DocId> = model
				.documents
				.keys()
				.filter(|doc_id| model.can_reveal(&peer_identity, doc_id, kind))
				.cloned()
				.collect();
			doc_ids.sort();
			vec![Command::Send { channel_id, msg: ChannelMsg::DirectoryResponse { doc_ids } }]
		}

		ChannelMsg::DirectoryResponse { doc_ids } => {
			// advisory: request sync only for documents we already hold
			let docs: Vec<SyncRequestEntry> = doc_ids
				.into_iter()
				.filter_map(|doc_id| {
					let doc = model.doc(&doc_id)?;
					Some(SyncRequestEntry { requester_version: doc.version(), doc_id })
				})
				.collect();
			if docs.is_empty() {
				return Vec::new();
			}
			vec![Command::Send { channel_id, msg: ChannelMsg::SyncRequest { docs } }]
		}

		ChannelMsg::SyncRequest { docs } => {
			let mut commands = Vec::new();
			for entry in docs {
				commands.extend(handle_sync_request_entry(model, channel_id, entry));
			}
			commands
		}

		ChannelMsg::SyncResponse { doc_id, transmission } => {
			handle_sync_response(model, channel_id, doc_id, transmission)
		}

		ChannelMsg::Ephemeral { doc_id, hops_remaining, stores } => {
			handle_ephemeral(model, channel_id, doc_id, hops_remaining, stores)
		}

		ChannelMsg::Batch { messages } => {
			let mut commands = Vec::new();
			for inner in messages {
				if !inner.batchable() {
					commands.push(log(
						LogLevel::Warn,
						format!("dropping nested {} inside batch", inner.label()),
					));
					continue;
				}
				commands.extend(handle_inbound(model, channel_id, inner));
			}
			commands
		}
	}
}

/// Promote a channel to established and run the post-handshake follow-ups:
/// reply (for the request side), directory discovery, and one sync-request
/// per revealable local document.
fn establish(
	model: &mut Model,
	channel_id: ChannelId,
	identity: Identity,
	reply: bool,
) -> Vec<Command> {
	if identity.peer_id == model.identity.peer_id {
		return vec![log(
			LogLevel::Warn,
			format!("channel {} presented our own peer id, ignoring", channel_id),
		)];
	}
	let Some(channel) = model.directory.get_mut(channel_id) else {
		return Vec::new();
	};
	if channel.is_established() {
		return vec![log(
			LogLevel::Warn,
			format!("duplicate establishment on channel {}", channel_id),
		)];
	}
	let kind = channel.kind;
	channel.state = ChannelState::Established { peer_id: identity.peer_id };
	let peer_identity = identity.clone();
	model.ensure_peer(identity, channel_id);

	let mut commands = vec![log(
		LogLevel::Info,
		format!(
			"channel {} established with peer {} ({})",
			channel_id, peer_identity.peer_id, peer_identity.name
		),
	)];
	if reply {
		commands.push(Command::SendEstablishment {
			channel_id,
			msg: ChannelMsg::EstablishResponse { identity: model.identity.clone() },
		});
	}
	commands.push(Command::Send { channel_id, msg: ChannelMsg::DirectoryRequest });

	let mut doc_ids: Vec<DocId> = model.documents.keys().cloned().collect();
	doc_ids.sort();
	for doc_id in doc_ids {
		if !model.can_reveal(&peer_identity, &doc_id, kind) {
			continue;
		}
		let Some(doc) = model.doc(&doc_id) else { continue };
		let entry = SyncRequestEntry { requester_version: doc.version(), doc_id };
		commands.push(Command::Send {
			channel_id,
			msg: ChannelMsg::SyncRequest { docs: vec![entry] },
		});
	}
	commands
}

fn channel_peer_identity(model: &Model, channel_id: ChannelId) -> Option<(Identity, ChannelKind)> {
	let channel = model.directory.get(channel_id)?;
	let peer_id = channel.peer_id()?;
	let peer = model.peers.get(&peer_id)?;
	Some((peer.identity.clone(), channel.kind))
}

fn handle_sync_request_entry(
	model: &mut Model,
	channel_id: ChannelId,
	entry: SyncRequestEntry,
) -> Vec<Command> {
	let Some((peer_identity, kind)) = channel_peer_identity(model, channel_id) else {
		return Vec::new();
	};
	let SyncRequestEntry { doc_id, requester_version } = entry;

	if !model.can_reveal(&peer_identity, &doc_id, kind) {
		// same answer as for a document that does not exist
		return vec![Command::Send {
			channel_id,
			msg: ChannelMsg::SyncResponse { doc_id, transmission: Transmission::Unavailable },
		}];
	}

	let Some(state) = model.documents.get(&doc_id) else {
		return handle_sync_request_miss(model, channel_id, doc_id, requester_version);
	};
	let doc = state.doc.clone();

	if let Some(peer) = model.peers.get_mut(&peer_identity.peer_id) {
		peer.subscriptions.insert(doc_id.clone());
	}

	let mut commands = Vec::new();
	// share our presence with the new subscriber right away
	if !model.own_namespaces(&doc_id).is_empty() {
		commands.push(Command::BroadcastEphemeralBatch {
			doc_ids: vec![doc_id.clone()],
			hops_remaining: model.config.forward_hops,
			to_channel: Some(channel_id),
		});
	}

	let ours = doc.version();
	let known = requester_version.join(&ours);
	match requester_version.partial_cmp_vv(&ours) {
		Some(std::cmp::Ordering::Equal) => {
			// nothing to transmit; the subscription is the result
		}
		Some(std::cmp::Ordering::Greater) => {
			// the requester is ahead: answer with a (possibly empty) delta
			// and ask for the rest ourselves
			let (transmission, warning) = export_transmission(&doc, &requester_version);
			commands.extend(warning);
			commands.push(Command::Send {
				channel_id,
				msg: ChannelMsg::SyncResponse { doc_id: doc_id.clone(), transmission },
			});
			commands.push(Command::Send {
				channel_id,
				msg: ChannelMsg::SyncRequest {
					docs: vec![SyncRequestEntry {
						doc_id: doc_id.clone(),
						requester_version: ours,
					}],
				},
			});
		}
		Some(std::cmp::Ordering::Less) | None => {
			// we are ahead or concurrent: importing an export from their
			// version converges both sides
			let (transmission, warning) = export_transmission(&doc, &requester_version);
			commands.extend(warning);
			commands.push(Command::Send {
				channel_id,
				msg: ChannelMsg::SyncResponse { doc_id: doc_id.clone(), transmission },
			});
		}
	}

	if let Some(peer) = model.peers.get_mut(&peer_identity.peer_id) {
		peer.awareness.insert(doc_id, known);
	}
	commands
}

/// A sync-request for a document we do not hold: ask storage first and
/// pipeline the reply, or report unavailable when no storage can help.
fn handle_sync_request_miss(
	model: &mut Model,
	channel_id: ChannelId,
	doc_id: DocId,
	requester_version: VersionVec,
) -> Vec<Command> {
	// the request itself declares interest: if the document shows up here
	// later, this peer receives it
	if let Some(peer_id) = model.peer_of_channel(channel_id) {
		if let Some(peer) = model.peers.get_mut(&peer_id) {
			peer.subscriptions.insert(doc_id.clone());
		}
	}

	let storage: Vec<ChannelId> = model
		.storage_channels()
		.into_iter()
		.filter(|&id| id != channel_id)
		.collect();
	if storage.is_empty() {
		return vec![Command::Send {
			channel_id,
			msg: ChannelMsg::SyncResponse { doc_id, transmission: Transmission::Unavailable },
		}];
	}

	if let Some(pending) = model.pending_fetches.get_mut(&doc_id) {
		pending.requesters.push((channel_id, requester_version));
		return Vec::new();
	}

	let doc = match model.create_doc(&doc_id, false) {
		Ok(doc) => doc,
		Err(err) => {
			return vec![
				log(LogLevel::Error, format!("cannot create doc {}: {}", doc_id, err)),
				Command::Send {
					channel_id,
					msg: ChannelMsg::SyncResponse {
						doc_id,
						transmission: Transmission::Unavailable,
					},
				},
			];
		}
	};
	model.pending_fetches.insert(
		doc_id.clone(),
		PendingFetch {
			requesters: vec![(channel_id, requester_version)],
			outstanding: storage.len(),
		},
	);

	let mut commands = vec![Command::SubscribeDoc { doc_id: doc_id.clone() }];
	let requester_version = doc.version();
	for storage_channel in storage {
		commands.push(Command::Send {
			channel_id: storage_channel,
			msg: ChannelMsg::SyncRequest {
				docs: vec![SyncRequestEntry {
					doc_id: doc_id.clone(),
					requester_version: requester_version.clone(),
				}],
			},
		});
	}
	commands
}

fn handle_sync_response(
	model: &mut Model,
	channel_id: ChannelId,
	doc_id: DocId,
	transmission: Transmission,
) -> Vec<Command> {
	let Some(from_peer) = model.peer_of_channel(channel_id) else {
		return Vec::new();
	};
	let kind = model.directory.get(channel_id).map(|c| c.kind);

	match transmission {
		Transmission::Unavailable => {
			if kind == Some(ChannelKind::Storage) {
				if let Some(pending) = model.pending_fetches.get_mut(&doc_id) {
					pending.outstanding = pending.outstanding.saturating_sub(1);
					if pending.outstanding == 0 {
						return resolve_failed_fetch(model, &doc_id);
					}
					return Vec::new();
				}
			}
			vec![log(
				LogLevel::Debug,
				format!("peer {} has nothing for doc {}", from_peer, doc_id),
			)]
		}
		Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } => {
			if !model.documents.contains_key(&doc_id) {
				return vec![log(
					LogLevel::Warn,
					format!("dropping sync-response for unknown doc {}", doc_id),
				)];
			}
			vec![Command::ImportDocData { doc_id, from_peer, data }]
		}
	}
}

/// Every storage channel reported unavailable for a doc we created on a
/// requester's behalf: pass the verdict along and drop the placeholder.
fn resolve_failed_fetch(model: &mut Model, doc_id: &DocId) -> Vec<Command> {
	let Some(pending) = model.pending_fetches.remove(doc_id) else {
		return Vec::new();
	};
	let mut commands = Vec::new();
	for (requester_channel, _) in pending.requesters {
		commands.push(Command::Send {
			channel_id: requester_channel,
			msg: ChannelMsg::SyncResponse {
				doc_id: doc_id.clone(),
				transmission: Transmission::Unavailable,
			},
		});
	}
	let still_empty = model
		.documents
		.get(doc_id)
		.is_some_and(|state| !state.app_ensured && state.doc.version().is_empty());
	if still_empty {
		model.documents.remove(doc_id);
		model.ephemeral.remove(doc_id);
		commands.push(Command::UnsubscribeDoc { doc_id: doc_id.clone() });
	}
	commands
}

fn handle_ephemeral(
	model: &mut Model,
	channel_id: ChannelId,
	doc_id: DocId,
	hops_remaining: u8,
	stores: Vec<vellum_types::message::EphemeralEnvelope>,
) -> Vec<Command> {
	if !model.documents.contains_key(&doc_id) {
		return vec![log(
			LogLevel::Debug,
			format!("ephemeral for unknown doc {}", doc_id),
		)];
	}

	let mut commands = Vec::new();
	for envelope in &stores {
		commands.push(Command::ApplyEphemeral {
			doc_id: doc_id.clone(),
			namespace: envelope.namespace.clone(),
			from_peer: envelope.peer_id,
			data: envelope.data.clone(),
		});
	}

	if hops_remaining > 0 {
		let targets: Vec<ChannelId> = model
			.subscribed_network_channels(&doc_id)
			.into_iter()
			.filter(|&id| id != channel_id)
			.collect();
		if !targets.is_empty() {
			let forwarded = ChannelMsg::Ephemeral {
				doc_id,
				hops_remaining: hops_remaining - 1,
				stores,
			};
			for target in targets {
				commands.push(Command::Send { channel_id: target, msg: forwarded.clone() });
			}
		}
	}
	commands
}

fn ensure_doc(model: &mut Model, doc_id: DocId) -> Option<Command> {
	if let Some(state) = model.documents.get_mut(&doc_id) {
		state.app_ensured = true;
		return None;
	}
	let doc = match model.create_doc(&doc_id, true) {
		Ok(doc) => doc,
		Err(err) => {
			return Some(log(LogLevel::Error, format!("cannot create doc {}: {}", doc_id, err)));
		}
	};

	let mut commands = vec![Command::SubscribeDoc { doc_id: doc_id.clone() }];
	let requester_version = doc.version();
	let channels: Vec<ChannelId> = model
		.directory
		.iter()
		.filter(|channel| channel.is_established())
		.map(|channel| channel.id)
		.collect();
	for channel_id in channels {
		let Some((peer_identity, kind)) = channel_peer_identity(model, channel_id) else {
			continue;
		};
		if !model.can_reveal(&peer_identity, &doc_id, kind) {
			continue;
		}
		commands.push(Command::Send {
			channel_id,
			msg: ChannelMsg::SyncRequest {
				docs: vec![SyncRequestEntry {
					doc_id: doc_id.clone(),
					requester_version: requester_version.clone(),
				}],
			},
		});
	}
	batch(commands)
}

/// Propagate the current document state to every subscribed peer whose
/// awareness is behind, optimistically bumping awareness so the same change
/// is never sent twice. `skip_peer` suppresses the echo back to the peer an
/// import just came from.
fn fan_out(model: &mut Model, doc_id: &DocId, skip_peer: Option<PeerId>) -> Vec<Command> {
	let Some(doc) = model.doc(doc_id).cloned() else {
		return vec![log(LogLevel::Warn, format!("change on unknown doc {}", doc_id))];
	};
	let ours = doc.version();

	struct Candidate {
		peer_id: PeerId,
		channel_id: ChannelId,
		kind: ChannelKind,
		identity: Identity,
		awareness: VersionVec,
	}

	let mut candidates: Vec<Candidate> = model
		.peers
		.iter()
		.filter(|(peer_id, peer)| {
			Some(**peer_id) != skip_peer && peer.subscriptions.contains(doc_id)
		})
		.filter_map(|(&peer_id, peer)| {
			let channel_id = model.send_channel(peer_id)?;
			let kind = model.directory.get(channel_id)?.kind;
			Some(Candidate {
				peer_id,
				channel_id,
				kind,
				identity: peer.identity.clone(),
				awareness: peer.awareness.get(doc_id).cloned().unwrap_or_default(),
			})
		})
		.collect();
	candidates.sort_by_key(|candidate| candidate.channel_id);

	let mut commands = Vec::new();
	for candidate in candidates {
		if !model.can_update(&candidate.identity, doc_id, candidate.kind) {
			continue;
		}
		if candidate.awareness.dominates(&ours) {
			continue;
		}
		let (transmission, warning) = export_transmission(&doc, &candidate.awareness);
		commands.extend(warning);
		if transmission == Transmission::Unavailable {
			continue;
		}
		commands.push(Command::Send {
			channel_id: candidate.channel_id,
			msg: ChannelMsg::SyncResponse { doc_id: doc_id.clone(), transmission },
		});
		if let Some(peer) = model.peers.get_mut(&candidate.peer_id) {
			peer.awareness.insert(doc_id.clone(), ours.clone());
		}
	}
	commands
}

/// Export an update relative to `from`, falling back to a snapshot when the
/// engine refuses the delta, and to `unavailable` when both exports fail.
fn export_transmission(doc: &Doc, from: &VersionVec) -> (Transmission, Option<Command>) {
	match doc.export_update_from(from) {
		Ok(data) => (Transmission::Update { data, to_version: doc.version() }, None),
		Err(update_err) => match doc.export_snapshot() {
			Ok(data) => (
				Transmission::Snapshot { data, to_version: doc.version() },
				Some(log(
					LogLevel::Warn,
					format!("update export failed ({}), sent snapshot", update_err),
				)),
			),
			Err(snapshot_err) => (
				Transmission::Unavailable,
				Some(log(
					LogLevel::Error,
					format!(
						"both exports failed: {} / {}",
						update_err, snapshot_err
					),
				)),
			),
		},
	}
}


// vim: ts=4
