//! The repo: construction, adapter lifecycle, and the application surface.
//!
//! A repo owns one synchronizer executor task, one driver task per storage
//! adapter, and the registered network adapters. Documents are reached
//! through [`Handle`]s returned by [`Repo::get`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use vellum_types::permissions::Permissions;
use vellum_types::storage_adapter::StorageAdapter;

use crate::executor::Executor;
use crate::handle::Handle;
use crate::model::{Model, SyncConfig};
use crate::network::{AdapterCtx, Clock, NetworkAdapter, Op, OutboundSink, SyncEvent};
use crate::prelude::*;
use crate::storage_channel::StorageDriver;
use crate::synchronizer::SyncMsg;

pub(crate) struct RepoShared {
	pub(crate) ops: mpsc::UnboundedSender<Op>,
	pub(crate) sync_events: broadcast::Sender<SyncEvent>,
	/// Syncs that already completed, so late waiters resolve immediately.
	pub(crate) synced: Arc<std::sync::Mutex<HashSet<(DocId, ChannelKind)>>>,
	/// Flips to true on shutdown; pending waiters resolve with an error.
	pub(crate) shutdown: watch::Sender<bool>,
}

/// Builder for a repo instance.
pub struct RepoBuilder {
	name: Box<str>,
	peer_id: Option<PeerId>,
	kind: IdentityKind,
	permissions: Permissions,
	config: SyncConfig,
	storage: Vec<Arc<dyn StorageAdapter>>,
	network: Vec<Box<dyn NetworkAdapter>>,
	clock: Option<Clock>,
}

impl RepoBuilder {
	pub fn new(name: impl Into<Box<str>>) -> RepoBuilder {
		RepoBuilder {
			name: name.into(),
			peer_id: None,
			kind: IdentityKind::User,
			permissions: Permissions::allow_all(),
			config: SyncConfig::default(),
			storage: Vec::new(),
			network: Vec::new(),
			clock: None,
		}
	}

	/// Pin the peer id instead of generating a random one.
	pub fn peer_id(mut self, peer_id: PeerId) -> Self {
		self.peer_id = Some(peer_id);
		self
	}

	/// Present a service identity (servers, relays) instead of a user one.
	pub fn service(mut self) -> Self {
		self.kind = IdentityKind::Service;
		self
	}

	pub fn permissions(mut self, permissions: Permissions) -> Self {
		self.permissions = permissions;
		self
	}

	pub fn config(mut self, config: SyncConfig) -> Self {
		self.config = config;
		self
	}

	pub fn storage(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
		self.storage.push(adapter);
		self
	}

	pub fn network(mut self, adapter: Box<dyn NetworkAdapter>) -> Self {
		self.network.push(adapter);
		self
	}

	/// Override the wall clock, for deterministic expiry tests.
	pub fn clock(mut self, clock: Clock) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Spawn the executor and storage drivers, then start every network
	/// adapter.
	pub async fn start(self) -> VelResult<Repo> {
		let peer_id = self.peer_id.unwrap_or_else(PeerId::random);
		let identity = Identity { peer_id, name: self.name, kind: self.kind };
		let clock: Clock = self.clock.unwrap_or_else(|| Arc::new(Timestamp::now));

		let (ops_tx, ops_rx) = mpsc::unbounded_channel();
		let (sync_events, _) = broadcast::channel(256);
		let synced = Arc::new(std::sync::Mutex::new(HashSet::new()));

		let mut model = Model::new(identity.clone(), self.permissions, self.config);

		// storage adapters become storage-kind channels before the executor
		// starts, so their establishment runs as the first dispatches
		let mut sinks = HashMap::new();
		let mut drivers = Vec::new();
		let mut driver_tasks = Vec::new();
		let mut storage_channel_ids = Vec::new();
		for adapter in self.storage {
			let label = format!("storage:{}", adapter.name());
			let channel_id = model.directory.create(ChannelKind::Storage, label, true);
			let (driver_tx, driver_rx) = mpsc::unbounded_channel();
			sinks.insert(channel_id, OutboundSink::Driver(driver_tx.clone()));
			drivers.push(driver_tx);
			storage_channel_ids.push(channel_id);
			let driver = StorageDriver::new(adapter, channel_id, ops_tx.clone());
			driver_tasks.push(tokio::spawn(driver.run(driver_rx)));
		}

		let executor = Executor::new(
			model,
			ops_tx.clone(),
			ops_rx,
			sinks,
			drivers,
			sync_events.clone(),
			synced.clone(),
			clock,
		);
		let executor_task = tokio::spawn(executor.run());

		for channel_id in storage_channel_ids {
			let _ = ops_tx.send(Op::Sync(SyncMsg::ChannelAdded { channel_id }));
		}

		let (shutdown, _) = watch::channel(false);
		let shared = Arc::new(RepoShared { ops: ops_tx, sync_events, synced, shutdown });

		let ctx = AdapterCtx { ops: shared.ops.clone() };
		let mut network = self.network;
		for adapter in &mut network {
			adapter.start(ctx.clone()).await?;
		}

		Ok(Repo { identity, shared, network, executor_task, driver_tasks })
	}
}

pub struct Repo {
	identity: Identity,
	shared: Arc<RepoShared>,
	network: Vec<Box<dyn NetworkAdapter>>,
	executor_task: tokio::task::JoinHandle<()>,
	driver_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Repo {
	pub fn builder(name: impl Into<Box<str>>) -> RepoBuilder {
		RepoBuilder::new(name)
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	/// Context for wiring ad-hoc transports (the in-process bridge, tests).
	pub fn adapter_ctx(&self) -> AdapterCtx {
		AdapterCtx { ops: self.shared.ops.clone() }
	}

	/// Ensure a document locally and return its handle. Idempotent: the
	/// same document is returned for repeated calls.
	pub async fn get(&self, doc_id: impl Into<DocId>) -> VelResult<Handle> {
		let doc_id = doc_id.into();
		let (reply_tx, reply_rx) = oneshot::channel();
		self.shared
			.ops
			.send(Op::EnsureDoc { doc_id: doc_id.clone(), reply: reply_tx })
			.map_err(|_| Error::Shutdown)?;
		let doc = reply_rx.await.map_err(|_| Error::Shutdown)??;
		Ok(Handle::new(doc_id, doc, self.shared.clone()))
	}

	/// Remove a document from the registry and from storage. Tombstones are
	/// not retained; a peer can re-introduce the document later.
	pub async fn delete_doc(&self, doc_id: impl Into<DocId>) -> VelResult<()> {
		self.shared
			.ops
			.send(Op::Sync(SyncMsg::DeleteDoc { doc_id: doc_id.into() }))
			.map_err(|_| Error::Shutdown)
	}

	/// Await every outstanding storage save, pushing a compaction snapshot
	/// of each document first.
	pub async fn flush(&self) -> VelResult<()> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.shared
			.ops
			.send(Op::Flush { reply: reply_tx })
			.map_err(|_| Error::Shutdown)?;
		reply_rx.await.map_err(|_| Error::Shutdown)?
	}

	/// Flush, stop the adapters, and end the executor. Pending
	/// `wait_for_sync` calls resolve with `Error::Shutdown`.
	pub async fn shutdown(mut self) -> VelResult<()> {
		let flush_result = self.flush().await;
		let _ = self.shared.shutdown.send(true);

		for adapter in &mut self.network {
			if let Err(err) = adapter.stop().await {
				warn!("adapter {} stop failed: {}", adapter.adapter_type(), err);
			}
		}

		let (reply_tx, reply_rx) = oneshot::channel();
		if self.shared.ops.send(Op::Shutdown { reply: reply_tx }).is_ok() {
			let _ = reply_rx.await;
		}
		if let Err(err) = (&mut self.executor_task).await {
			warn!("executor task ended abnormally: {}", err);
		}
		for task in &mut self.driver_tasks {
			if let Err(err) = task.await {
				warn!("storage driver task ended abnormally: {}", err);
			}
		}
		flush_result
	}
}

impl std::fmt::Debug for Repo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Repo").field("identity", &self.identity).finish()
	}
}

// vim: ts=4
