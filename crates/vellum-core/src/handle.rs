//! Application-facing façade over one synchronized document.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use crate::doc::SharedDoc;
use crate::network::{Op, PresenceUpdate};
use crate::prelude::*;
use crate::repo::RepoShared;
use crate::synchronizer::SyncMsg;

/// Handle to one document held by a repo. Cheap to clone; all clones reach
/// the same underlying document.
#[derive(Clone)]
pub struct Handle {
	doc_id: DocId,
	doc: SharedDoc,
	shared: Arc<RepoShared>,
}

impl Handle {
	pub(crate) fn new(doc_id: DocId, doc: SharedDoc, shared: Arc<RepoShared>) -> Handle {
		Handle { doc_id, doc, shared }
	}

	pub fn doc_id(&self) -> &DocId {
		&self.doc_id
	}

	/// The shared document, for reads.
	pub fn doc(&self) -> &SharedDoc {
		&self.doc
	}

	/// Mutate the document and commit. The local-update subscription fires
	/// before this returns, so propagation is already queued.
	pub fn change<R>(&self, f: impl FnOnce(&loro::LoroDoc) -> R) -> R {
		let out = f(self.doc.inner());
		self.doc.inner().commit();
		out
	}

	/// Resolve once a sync has completed for this document over a channel
	/// of `kind` (any kind when `None`), or time out.
	pub async fn wait_for_sync(
		&self,
		kind: Option<ChannelKind>,
		timeout: Duration,
	) -> VelResult<()> {
		let mut events = self.shared.sync_events.subscribe();

		// a matching sync may have completed before we subscribed
		{
			let synced = self
				.shared
				.synced
				.lock()
				.map_err(|_| Error::Internal("sync history poisoned".into()))?;
			let done = match kind {
				Some(kind) => synced.contains(&(self.doc_id.clone(), kind)),
				None => {
					synced.contains(&(self.doc_id.clone(), ChannelKind::Network))
						|| synced.contains(&(self.doc_id.clone(), ChannelKind::Storage))
				}
			};
			if done {
				return Ok(());
			}
		}

		let mut shutdown = self.shared.shutdown.subscribe();
		if *shutdown.borrow() {
			return Err(Error::Shutdown);
		}

		let wanted_doc = self.doc_id.clone();
		let wait = async move {
			loop {
				tokio::select! {
					event = events.recv() => match event {
						Ok(event) if event.doc_id == wanted_doc => match kind {
							Some(kind) if event.kind != kind => continue,
							_ => return Ok(()),
						},
						Ok(_) => continue,
						Err(broadcast::error::RecvError::Lagged(_)) => continue,
						Err(broadcast::error::RecvError::Closed) => return Err(Error::Shutdown),
					},
					_ = shutdown.changed() => return Err(Error::Shutdown),
				}
			}
		};
		match tokio::time::timeout(timeout, wait).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout),
		}
	}

	/// The presence façade for this document.
	pub fn presence(&self) -> Presence {
		Presence { doc_id: self.doc_id.clone(), shared: self.shared.clone() }
	}
}

impl std::fmt::Debug for Handle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Handle").field("doc_id", &self.doc_id).finish()
	}
}

/// Ephemeral per-peer state of one document: our own entries go out with
/// every heartbeat, peer entries expire unless refreshed.
pub struct Presence {
	doc_id: DocId,
	shared: Arc<RepoShared>,
}

impl Presence {
	/// Set our own value for a namespace and broadcast it.
	pub fn set<T: Serialize>(&self, namespace: &str, value: &T) -> VelResult<()> {
		let mut data = Vec::new();
		ciborium::ser::into_writer(value, &mut data)
			.map_err(|err| Error::Internal(format!("presence encode: {}", err)))?;
		self.shared
			.ops
			.send(Op::Sync(SyncMsg::SetEphemeral {
				doc_id: self.doc_id.clone(),
				namespace: namespace.into(),
				data,
			}))
			.map_err(|_| Error::Shutdown)
	}

	/// Our own current value for a namespace.
	pub async fn self_state<T: DeserializeOwned>(&self, namespace: &str) -> VelResult<Option<T>> {
		let snapshot = self.snapshot(namespace).await?;
		match snapshot.own {
			Some(data) => Ok(Some(decode_value(&data)?)),
			None => Ok(None),
		}
	}

	/// One peer's live value for a namespace.
	pub async fn get<T: DeserializeOwned>(
		&self,
		namespace: &str,
		peer_id: PeerId,
	) -> VelResult<Option<T>> {
		let snapshot = self.snapshot(namespace).await?;
		for (peer, data) in snapshot.peers {
			if peer == peer_id {
				return Ok(Some(decode_value(&data)?));
			}
		}
		Ok(None)
	}

	/// All live peer values for a namespace.
	pub async fn peers<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> VelResult<Vec<(PeerId, T)>> {
		let snapshot = self.snapshot(namespace).await?;
		let mut values = Vec::with_capacity(snapshot.peers.len());
		for (peer, data) in snapshot.peers {
			values.push((peer, decode_value(&data)?));
		}
		Ok(values)
	}

	/// Observe remote presence changes for this document.
	pub fn subscribe(
		&self,
		callback: impl Fn(PresenceUpdate) + Send + 'static,
	) -> VelResult<()> {
		self.shared
			.ops
			.send(Op::SubscribePresence {
				doc_id: self.doc_id.clone(),
				callback: Box::new(callback),
			})
			.map_err(|_| Error::Shutdown)
	}

	async fn snapshot(&self, namespace: &str) -> VelResult<crate::network::PresenceSnapshot> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.shared
			.ops
			.send(Op::GetPresence {
				doc_id: self.doc_id.clone(),
				namespace: namespace.into(),
				reply: reply_tx,
			})
			.map_err(|_| Error::Shutdown)?;
		reply_rx.await.map_err(|_| Error::Shutdown)
	}
}

fn decode_value<T: DeserializeOwned>(data: &[u8]) -> VelResult<T> {
	ciborium::de::from_reader(data)
		.map_err(|err| Error::Decode(format!("presence value: {}", err)))
}

// vim: ts=4
