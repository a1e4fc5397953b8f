//! The storage channel driver.
//!
//! Persistence happens through the same protocol as network propagation:
//! each storage adapter is wrapped in a driver task that answers
//! establishment, directory and sync-request messages from stored data, and
//! persists every received update transmission. The driver never decodes
//! CRDT bytes; it tracks document versions through the `to_version` carried
//! on transmissions and the version tags in the key layout.
//!
//! Key layout (see `vellum_types::storage_adapter`):
//! - `[doc_id]`                          engine snapshot
//! - `[doc_id, "update", version_tag]`   incremental delta

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use vellum_types::message::{ChannelMsg, SyncRequestEntry, Transmission};
use vellum_types::storage_adapter::StorageAdapter;

use crate::network::Op;
use crate::prelude::*;

pub(crate) const UPDATE_SEGMENT: &str = "update";

/// Mailbox of one driver task. `Deliver` carries protocol traffic; the rest
/// are control operations from the executor.
#[derive(Debug)]
pub(crate) enum DriverOp {
	Deliver(ChannelMsg),
	/// Ack once all previously delivered saves are on disk; reports the
	/// first storage fault seen since the last flush.
	Flush(oneshot::Sender<VelResult<()>>),
	DeleteDoc(DocId),
	Stop,
}

pub(crate) struct StorageDriver {
	adapter: Arc<dyn StorageAdapter>,
	identity: Identity,
	channel_id: ChannelId,
	ops: mpsc::UnboundedSender<Op>,
	/// Join of every stored version tag, per document.
	versions: HashMap<DocId, VersionVec>,
	/// First unreported storage fault.
	fault: Option<Error>,
}

impl StorageDriver {
	pub(crate) fn new(
		adapter: Arc<dyn StorageAdapter>,
		channel_id: ChannelId,
		ops: mpsc::UnboundedSender<Op>,
	) -> StorageDriver {
		let identity = Identity::service(PeerId::random(), adapter.name());
		StorageDriver { adapter, identity, channel_id, ops, versions: HashMap::new(), fault: None }
	}

	pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverOp>) {
		while let Some(op) = rx.recv().await {
			match op {
				DriverOp::Deliver(msg) => self.handle(msg).await,
				DriverOp::Flush(reply) => {
					let _ = reply.send(match self.fault.take() {
						Some(err) => Err(err),
						None => Ok(()),
					});
				}
				DriverOp::DeleteDoc(doc_id) => {
					self.versions.remove(&doc_id);
					let prefix = vec![doc_id.as_str().to_string()];
					if let Err(err) = self.adapter.remove_range(&prefix).await {
						self.record_fault(err);
					}
				}
				DriverOp::Stop => break,
			}
		}
	}

	fn reply(&self, msg: ChannelMsg) {
		let _ = self.ops.send(Op::InboundMsg { channel_id: self.channel_id, msg });
	}

	fn record_fault(&mut self, err: Error) {
		warn!("storage adapter {}: {}", self.adapter.name(), err);
		if self.fault.is_none() {
			self.fault = Some(err);
		}
	}

	async fn handle(&mut self, msg: ChannelMsg) {
		match msg {
			ChannelMsg::EstablishRequest { .. } => {
				self.reply(ChannelMsg::EstablishResponse { identity: self.identity.clone() });
			}
			ChannelMsg::EstablishResponse { .. } => {}

			ChannelMsg::DirectoryRequest => {
				let doc_ids = match self.list_docs().await {
					Ok(doc_ids) => doc_ids,
					Err(err) => {
						self.record_fault(err);
						Vec::new()
					}
				};
				self.reply(ChannelMsg::DirectoryResponse { doc_ids });
			}
			ChannelMsg::DirectoryResponse { .. } => {}

			ChannelMsg::SyncRequest { docs } => {
				for entry in docs {
					self.serve_sync_request(entry).await;
				}
			}

			ChannelMsg::SyncResponse { doc_id, transmission } => {
				self.persist(doc_id, transmission).await;
			}

			// presence is never persisted
			ChannelMsg::Ephemeral { .. } => {}

			ChannelMsg::Batch { messages } => {
				for inner in messages {
					Box::pin(self.handle(inner)).await;
				}
			}
		}
	}

	/// Distinct top-level key components are the stored document ids.
	async fn list_docs(&self) -> VelResult<Vec<DocId>> {
		let entries = self.adapter.load_range(&[]).await?;
		let mut doc_ids: Vec<DocId> = Vec::new();
		for entry in entries {
			if let Some(first) = entry.key.first() {
				let doc_id = DocId::from(first.as_str());
				if doc_ids.last() != Some(&doc_id) {
					doc_ids.push(doc_id);
				}
			}
		}
		doc_ids.dedup();
		Ok(doc_ids)
	}

	/// Answer one sync-request entry from stored data: the snapshot (if
	/// any) followed by every delta in version-tag order, then mirror a
	/// sync-request of our own so the synchronizer records this channel as
	/// subscribed and keeps sending future changes here.
	async fn serve_sync_request(&mut self, entry: SyncRequestEntry) {
		let SyncRequestEntry { doc_id, requester_version } = entry;
		let prefix = vec![doc_id.as_str().to_string()];
		let entries = match self.adapter.load_range(&prefix).await {
			Ok(entries) => entries,
			Err(err) => {
				self.record_fault(err);
				self.reply(ChannelMsg::SyncResponse {
					doc_id,
					transmission: Transmission::Unavailable,
				});
				return;
			}
		};

		let mut stored_version = VersionVec::new();
		let mut transmissions = Vec::new();
		let mut have_anything = false;
		for stored in &entries {
			match stored.key.as_slice() {
				[first] if first == doc_id.as_str() => {
					have_anything = true;
					transmissions.push(Transmission::Snapshot {
						data: stored.data.clone(),
						to_version: VersionVec::new(),
					});
				}
				[first, segment, tag]
					if first == doc_id.as_str() && segment == UPDATE_SEGMENT =>
				{
					match VersionVec::from_version_tag(tag) {
						Ok(to_version) => {
							have_anything = true;
							stored_version = stored_version.join(&to_version);
							// skip deltas the requester already covers
							if !requester_version.is_empty()
								&& requester_version.dominates(&to_version)
							{
								continue;
							}
							transmissions.push(Transmission::Update {
								data: stored.data.clone(),
								to_version,
							});
						}
						Err(err) => {
							warn!("skipping delta with bad version tag {}: {}", tag, err);
						}
					}
				}
				_ => {}
			}
		}

		if !have_anything {
			self.reply(ChannelMsg::SyncResponse {
				doc_id: doc_id.clone(),
				transmission: Transmission::Unavailable,
			});
		} else {
			for transmission in transmissions {
				self.reply(ChannelMsg::SyncResponse { doc_id: doc_id.clone(), transmission });
			}
			self.versions.insert(doc_id.clone(), stored_version);
		}

		// subscribe for persistence of everything we do not have yet
		self.reply(ChannelMsg::SyncRequest {
			docs: vec![SyncRequestEntry {
				requester_version: self.versions.get(&doc_id).cloned().unwrap_or_default(),
				doc_id,
			}],
		});
	}

	async fn persist(&mut self, doc_id: DocId, transmission: Transmission) {
		match transmission {
			Transmission::Update { data, to_version } => {
				let known = self.versions.entry(doc_id.clone()).or_default();
				if !to_version.is_empty() && known.dominates(&to_version) {
					// already stored
					return;
				}
				let key = vec![
					doc_id.as_str().to_string(),
					UPDATE_SEGMENT.to_string(),
					to_version.version_tag(),
				];
				match self.adapter.save(&key, &data).await {
					Ok(()) => {
						let merged = known.join(&to_version);
						self.versions.insert(doc_id, merged);
					}
					Err(err) => self.record_fault(err),
				}
			}
			Transmission::Snapshot { data, to_version } => {
				let key = vec![doc_id.as_str().to_string()];
				if let Err(err) = self.adapter.save(&key, &data).await {
					self.record_fault(err);
					return;
				}
				// snapshot covers all stored deltas; compact them away
				let prefix = vec![doc_id.as_str().to_string(), UPDATE_SEGMENT.to_string()];
				if let Err(err) = self.adapter.remove_range(&prefix).await {
					self.record_fault(err);
				}
				let known = self.versions.entry(doc_id).or_default();
				*known = known.join(&to_version);
			}
			Transmission::Unavailable => {}
		}
	}
}

// vim: ts=4
