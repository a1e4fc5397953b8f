//! The command executor: the side-effecting interpreter around the pure
//! reducer.
//!
//! Exactly one executor task runs per repo. Every inbound adapter event,
//! local-update callback, timer fire and application call is serialized into
//! its mailbox; each one is dispatched through `update`, the resulting
//! commands are interpreted (including re-dispatches, which run to
//! completion first), and only then is the outbound batcher flushed.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

use vellum_proto::codec::{decode_msg, encode_msg};
use vellum_proto::frame::{encode_fragments, encode_single};
use vellum_proto::reassembler::{Reassembler, Reassembly};
use vellum_types::message::{ChannelMsg, EphemeralEnvelope, Transmission};

use crate::batcher::OutboundBatcher;
use crate::model::Model;
use crate::network::{
	Clock, Op, OutboundSink, PresenceCallback, PresenceSnapshot, PresenceUpdate, SyncEvent,
};
use crate::prelude::*;
use crate::storage_channel::DriverOp;
use crate::synchronizer::{Command, LogLevel, SyncMsg, update};

enum Flow {
	Continue,
	Stop,
}

pub(crate) struct Executor {
	model: Model,
	ops_tx: mpsc::UnboundedSender<Op>,
	ops_rx: mpsc::UnboundedReceiver<Op>,
	batcher: OutboundBatcher,
	sinks: HashMap<ChannelId, OutboundSink>,
	reassemblers: HashMap<ChannelId, Reassembler>,
	doc_subscriptions: HashMap<DocId, loro::Subscription>,
	presence_subs: HashMap<DocId, Vec<PresenceCallback>>,
	sync_events: broadcast::Sender<SyncEvent>,
	synced: std::sync::Arc<std::sync::Mutex<std::collections::HashSet<(DocId, ChannelKind)>>>,
	drivers: Vec<mpsc::UnboundedSender<DriverOp>>,
	clock: Clock,
	fragment_counter: u64,
	/// Channels whose sink failed during this pass; removed after flush.
	faulted: Vec<ChannelId>,
}

impl Executor {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		model: Model,
		ops_tx: mpsc::UnboundedSender<Op>,
		ops_rx: mpsc::UnboundedReceiver<Op>,
		sinks: HashMap<ChannelId, OutboundSink>,
		drivers: Vec<mpsc::UnboundedSender<DriverOp>>,
		sync_events: broadcast::Sender<SyncEvent>,
		synced: std::sync::Arc<
			std::sync::Mutex<std::collections::HashSet<(DocId, ChannelKind)>>,
		>,
		clock: Clock,
	) -> Executor {
		Executor {
			model,
			ops_tx,
			ops_rx,
			batcher: OutboundBatcher::new(),
			sinks,
			reassemblers: HashMap::new(),
			doc_subscriptions: HashMap::new(),
			presence_subs: HashMap::new(),
			sync_events,
			synced,
			drivers,
			clock,
			fragment_counter: 0,
			faulted: Vec::new(),
		}
	}

	pub(crate) async fn run(mut self) {
		let mut heartbeat =
			tokio::time::interval(Duration::from_millis(self.model.config.heartbeat_interval_ms));
		heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		// the first tick of an interval completes immediately
		heartbeat.tick().await;

		loop {
			tokio::select! {
				op = self.ops_rx.recv() => match op {
					Some(op) => {
						if matches!(self.handle_op(op), Flow::Stop) {
							break;
						}
					}
					None => break,
				},
				_ = heartbeat.tick() => self.step(SyncMsg::Heartbeat),
			}
		}

		for driver in &self.drivers {
			let _ = driver.send(DriverOp::Stop);
		}
	}

	fn handle_op(&mut self, op: Op) -> Flow {
		match op {
			Op::Sync(msg) => self.step(msg),

			Op::RegisterChannel { kind, adapter_type, initiate, outbound, reply } => {
				let channel_id = self.model.directory.create(kind, adapter_type, initiate);
				self.sinks.insert(channel_id, outbound);
				self.reassemblers.insert(
					channel_id,
					Reassembler::new(self.model.config.reassembly_timeout_ms),
				);
				let _ = reply.send(channel_id);
				self.step(SyncMsg::ChannelAdded { channel_id });
			}

			Op::InboundFrame { channel_id, bytes } => {
				let now = (self.clock)();
				let Some(reassembler) = self.reassemblers.get_mut(&channel_id) else {
					warn!("frame for unknown channel {}", channel_id);
					return Flow::Continue;
				};
				match reassembler.accept_at(&bytes, now) {
					Ok(Reassembly::Complete(payload)) => match decode_msg(&payload) {
						Ok(msg) => self.step(SyncMsg::Inbound { channel_id, msg }),
						Err(err) => warn!("channel {}: {}", channel_id, err),
					},
					Ok(Reassembly::Pending) => {}
					Err(err) => warn!("channel {}: {}", channel_id, err),
				}
			}

			Op::InboundMsg { channel_id, msg } => {
				self.step(SyncMsg::Inbound { channel_id, msg });
			}

			Op::CloseChannel { channel_id } => {
				self.cleanup_channel(channel_id);
				self.step(SyncMsg::ChannelRemoved { channel_id });
			}

			Op::EnsureDoc { doc_id, reply } => {
				self.step(SyncMsg::EnsureDoc { doc_id: doc_id.clone() });
				let result = self
					.model
					.doc(&doc_id)
					.cloned()
					.ok_or_else(|| Error::Internal(format!("doc {} not created", doc_id)));
				let _ = reply.send(result);
			}

			Op::GetPresence { doc_id, namespace, reply } => {
				let _ = reply.send(self.presence_snapshot(&doc_id, &namespace));
			}

			Op::SubscribePresence { doc_id, callback } => {
				self.presence_subs.entry(doc_id).or_default().push(callback);
			}

			Op::Flush { reply } => self.flush_storage(reply),

			Op::Shutdown { reply } => {
				let _ = reply.send(());
				return Flow::Stop;
			}
		}
		Flow::Continue
	}

	/// Run one inbound message to quiescence: reduce, interpret commands
	/// (re-dispatches included), flush the batcher, then deal with channels
	/// that faulted while sending.
	fn step(&mut self, msg: SyncMsg) {
		let mut queue = VecDeque::new();
		queue.push_back(msg);
		loop {
			while let Some(msg) = queue.pop_front() {
				let now = (self.clock)();
				if let Some(command) = update(&mut self.model, msg, now) {
					self.execute(command, &mut queue);
				}
			}
			self.flush_outbound();

			let faulted = std::mem::take(&mut self.faulted);
			if faulted.is_empty() {
				break;
			}
			for channel_id in faulted {
				self.cleanup_channel(channel_id);
				queue.push_back(SyncMsg::ChannelRemoved { channel_id });
			}
		}
	}

	fn execute(&mut self, command: Command, queue: &mut VecDeque<SyncMsg>) {
		match command {
			Command::Send { channel_id, msg } => self.batcher.queue(channel_id, msg),

			Command::SendEstablishment { channel_id, msg } => self.send_now(channel_id, &msg),

			Command::SubscribeDoc { doc_id } => {
				let Some(doc) = self.model.doc(&doc_id).cloned() else {
					warn!("subscribe for unknown doc {}", doc_id);
					return;
				};
				let ops = self.ops_tx.clone();
				let sub_doc_id = doc_id.clone();
				let subscription = doc.subscribe_local_updates(Box::new(move |_bytes| {
					let _ = ops.send(Op::Sync(SyncMsg::LocalDocChange {
						doc_id: sub_doc_id.clone(),
					}));
					true
				}));
				self.doc_subscriptions.insert(doc_id, subscription);
			}

			Command::UnsubscribeDoc { doc_id } => {
				self.doc_subscriptions.remove(&doc_id);
				self.presence_subs.remove(&doc_id);
			}

			Command::ImportDocData { doc_id, from_peer, data } => {
				let Some(doc) = self.model.doc(&doc_id).cloned() else {
					warn!("import for unknown doc {}", doc_id);
					return;
				};
				match doc.import(&data) {
					Ok(()) => {
						let kind = self.peer_kind(from_peer);
						if let Ok(mut synced) = self.synced.lock() {
							synced.insert((doc_id.clone(), kind));
						}
						let _ = self
							.sync_events
							.send(SyncEvent { doc_id: doc_id.clone(), kind });
						queue.push_back(SyncMsg::DocImported { doc_id, from_peer });
					}
					Err(err) => {
						warn!("import for doc {} from peer {} failed: {}", doc_id, from_peer, err);
					}
				}
			}

			Command::BroadcastEphemeralBatch { doc_ids, hops_remaining, to_channel } => {
				for doc_id in doc_ids {
					let namespaces = self.model.own_namespaces(&doc_id);
					for namespace in namespaces {
						let to_channels = match to_channel {
							Some(channel_id) => vec![channel_id],
							None => self.model.subscribed_network_channels(&doc_id),
						};
						self.broadcast_namespace(&doc_id, &namespace, hops_remaining, to_channels);
					}
				}
			}

			Command::BroadcastEphemeralNamespace {
				doc_id,
				namespace,
				hops_remaining,
				to_channels,
			} => {
				self.broadcast_namespace(&doc_id, &namespace, hops_remaining, to_channels);
			}

			Command::ApplyEphemeral { doc_id, namespace, from_peer, data } => {
				let now = (self.clock)();
				let stores = self.model.namespace_stores(&doc_id, &namespace);
				match stores.remote.apply(&data, now) {
					Ok(changed) => {
						if changed.is_empty() {
							return;
						}
						if let Some(callbacks) = self.presence_subs.get(&doc_id) {
							let event = PresenceUpdate {
								doc_id,
								namespace,
								peer_id: from_peer,
							};
							for callback in callbacks {
								callback(event.clone());
							}
						}
					}
					Err(err) => {
						warn!("ephemeral apply for doc {} failed: {}", doc_id, err);
					}
				}
			}

			Command::RemoveDocFromStorage { doc_id } => {
				for driver in &self.drivers {
					let _ = driver.send(DriverOp::DeleteDoc(doc_id.clone()));
				}
			}

			Command::Dispatch { msg } => queue.push_back(*msg),

			Command::Batch { commands } => {
				for command in commands {
					self.execute(command, queue);
				}
			}

			Command::Log { level, message } => match level {
				LogLevel::Debug => debug!("{}", message),
				LogLevel::Info => info!("{}", message),
				LogLevel::Warn => warn!("{}", message),
				LogLevel::Error => error!("{}", message),
			},
		}
	}

	/// Encode one namespace with refreshed timestamps and queue it to the
	/// target channels.
	fn broadcast_namespace(
		&mut self,
		doc_id: &DocId,
		namespace: &str,
		hops_remaining: u8,
		to_channels: Vec<ChannelId>,
	) {
		if to_channels.is_empty() {
			return;
		}
		let now = (self.clock)();
		let peer_id = self.model.identity.peer_id;
		let Some(stores) = self
			.model
			.ephemeral
			.get_mut(doc_id)
			.and_then(|namespaces| namespaces.get_mut(namespace))
		else {
			return;
		};
		if stores.own.is_empty() {
			return;
		}
		let data = match stores.own.encode_all_fresh(now) {
			Ok(data) => data,
			Err(err) => {
				warn!("ephemeral encode for doc {} failed: {}", doc_id, err);
				return;
			}
		};
		let msg = ChannelMsg::Ephemeral {
			doc_id: doc_id.clone(),
			hops_remaining,
			stores: vec![EphemeralEnvelope { peer_id, namespace: namespace.into(), data }],
		};
		for channel_id in to_channels {
			self.batcher.queue(channel_id, msg.clone());
		}
	}

	/// Drain the batcher: per channel, one message or one batch envelope.
	fn flush_outbound(&mut self) {
		if self.batcher.is_empty() {
			return;
		}
		let mut batcher = std::mem::take(&mut self.batcher);
		batcher.flush(|channel_id, msg| self.send_now(channel_id, &msg));
	}

	/// Encode and hand one envelope to a channel's sink, fragmenting large
	/// payloads. Send failures mark the channel faulted.
	fn send_now(&mut self, channel_id: ChannelId, msg: &ChannelMsg) {
		let Some(sink) = self.sinks.get(&channel_id) else {
			debug!("dropping {} for unknown channel {}", msg.label(), channel_id);
			return;
		};
		match sink {
			OutboundSink::Driver(tx) => {
				if tx.send(DriverOp::Deliver(msg.clone())).is_err() {
					self.faulted.push(channel_id);
				}
			}
			OutboundSink::Frames(tx) => {
				let payload = match encode_msg(msg) {
					Ok(payload) => payload,
					Err(err) => {
						error!("encode for channel {} failed: {}", channel_id, err);
						return;
					}
				};
				let max_payload = self.model.config.max_frame_payload;
				let frames = if payload.len() > max_payload {
					self.fragment_counter += 1;
					encode_fragments(&payload, max_payload, self.fragment_counter)
				} else {
					vec![encode_single(&payload)]
				};
				for frame in frames {
					if tx.send(frame).is_err() {
						self.faulted.push(channel_id);
						break;
					}
				}
			}
		}
	}

	fn cleanup_channel(&mut self, channel_id: ChannelId) {
		self.sinks.remove(&channel_id);
		self.reassemblers.remove(&channel_id);
	}

	fn peer_kind(&self, peer_id: PeerId) -> ChannelKind {
		self.model
			.send_channel(peer_id)
			.and_then(|channel_id| self.model.directory.get(channel_id))
			.map(|channel| channel.kind)
			.unwrap_or(ChannelKind::Network)
	}

	fn presence_snapshot(&self, doc_id: &DocId, namespace: &str) -> PresenceSnapshot {
		let now = (self.clock)();
		let own_key = self.model.identity.peer_id.to_string();
		let mut snapshot = PresenceSnapshot::default();
		let Some(stores) = self
			.model
			.ephemeral
			.get(doc_id)
			.and_then(|namespaces| namespaces.get(namespace))
		else {
			return snapshot;
		};
		snapshot.own = stores.own.get(&own_key, now).map(<[u8]>::to_vec);
		for (key, data) in stores.remote.iter_fresh(now) {
			match PeerId::parse(key) {
				Ok(peer_id) if peer_id != self.model.identity.peer_id => {
					snapshot.peers.push((peer_id, data.to_vec()));
				}
				Ok(_) => {}
				Err(err) => debug!("skipping ephemeral entry with bad key: {}", err),
			}
		}
		snapshot
	}

	/// Push a compaction snapshot of every document to the storage
	/// channels, flush the wire, then collect the drivers' flush acks off
	/// the executor task.
	fn flush_storage(&mut self, reply: oneshot::Sender<VelResult<()>>) {
		let storage_channels = self.model.storage_channels();
		if !storage_channels.is_empty() {
			let mut doc_ids: Vec<DocId> = self.model.documents.keys().cloned().collect();
			doc_ids.sort();
			for doc_id in doc_ids {
				let Some(doc) = self.model.doc(&doc_id).cloned() else { continue };
				let to_version = doc.version();
				if to_version.is_empty() {
					continue;
				}
				match doc.export_snapshot() {
					Ok(data) => {
						let transmission = Transmission::Snapshot { data, to_version };
						for &channel_id in &storage_channels {
							self.batcher.queue(
								channel_id,
								ChannelMsg::SyncResponse {
									doc_id: doc_id.clone(),
									transmission: transmission.clone(),
								},
							);
						}
					}
					Err(err) => warn!("flush snapshot for doc {} failed: {}", doc_id, err),
				}
			}
			self.flush_outbound();
		}

		let mut acks = Vec::new();
		for driver in &self.drivers {
			let (ack_tx, ack_rx) = oneshot::channel();
			if driver.send(DriverOp::Flush(ack_tx)).is_ok() {
				acks.push(ack_rx);
			}
		}
		tokio::spawn(async move {
			for ack in acks {
				match ack.await {
					Ok(Ok(())) => {}
					Ok(Err(err)) => {
						let _ = reply.send(Err(err));
						return;
					}
					Err(_) => {
						let _ = reply.send(Err(Error::Shutdown));
						return;
					}
				}
			}
			let _ = reply.send(Ok(()));
		});
	}
}

// vim: ts=4
