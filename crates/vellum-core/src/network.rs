//! The network adapter contract and the context handed to adapters.
//!
//! Adapters own their transport resources. They register channels, push
//! inbound frames, and signal closure through [`AdapterCtx`]; outbound
//! frames reach them over the sink they registered. Adapters never touch
//! the model.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use vellum_types::message::ChannelMsg;

use crate::doc::SharedDoc;
use crate::prelude::*;
use crate::storage_channel::DriverOp;
use crate::synchronizer::SyncMsg;

/// Wall clock source, injectable for deterministic tests.
pub type Clock = std::sync::Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// A sync completed for a document over a channel of this kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncEvent {
	pub doc_id: DocId,
	pub kind: ChannelKind,
}

/// A remote peer's ephemeral entry changed.
#[derive(Clone, Debug)]
pub struct PresenceUpdate {
	pub doc_id: DocId,
	pub namespace: Box<str>,
	pub peer_id: PeerId,
}

pub type PresenceCallback = Box<dyn Fn(PresenceUpdate) + Send + 'static>;

/// Point-in-time view of one `(doc, namespace)` presence pair.
#[derive(Debug, Default)]
pub struct PresenceSnapshot {
	pub own: Option<Vec<u8>>,
	pub peers: Vec<(PeerId, Vec<u8>)>,
}

/// Where outbound traffic for a channel goes.
#[derive(Debug)]
pub(crate) enum OutboundSink {
	/// Encoded frames toward a byte transport.
	Frames(mpsc::UnboundedSender<Vec<u8>>),
	/// Decoded messages toward a storage channel driver.
	Driver(mpsc::UnboundedSender<DriverOp>),
}

/// The executor's mailbox. Everything that happens (adapter events, app
/// calls, driver replies) is serialized through this one queue.
pub(crate) enum Op {
	Sync(SyncMsg),
	RegisterChannel {
		kind: ChannelKind,
		adapter_type: Box<str>,
		initiate: bool,
		outbound: OutboundSink,
		reply: oneshot::Sender<ChannelId>,
	},
	InboundFrame { channel_id: ChannelId, bytes: Vec<u8> },
	InboundMsg { channel_id: ChannelId, msg: ChannelMsg },
	CloseChannel { channel_id: ChannelId },
	EnsureDoc { doc_id: DocId, reply: oneshot::Sender<VelResult<SharedDoc>> },
	GetPresence {
		doc_id: DocId,
		namespace: Box<str>,
		reply: oneshot::Sender<PresenceSnapshot>,
	},
	SubscribePresence { doc_id: DocId, callback: PresenceCallback },
	Flush { reply: oneshot::Sender<VelResult<()>> },
	Shutdown { reply: oneshot::Sender<()> },
}

/// Capability handle adapters use to talk to the synchronizer.
#[derive(Clone)]
pub struct AdapterCtx {
	pub(crate) ops: mpsc::UnboundedSender<Op>,
}

impl AdapterCtx {
	/// Register a new channel for one transport connection. `initiate`
	/// makes this side open the handshake (connectors yes, acceptors no).
	/// Outbound frames for the channel arrive on the paired receiver.
	pub async fn register_channel(
		&self,
		adapter_type: &str,
		initiate: bool,
	) -> VelResult<(ChannelId, mpsc::UnboundedReceiver<Vec<u8>>)> {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (reply_tx, reply_rx) = oneshot::channel();
		self.ops
			.send(Op::RegisterChannel {
				kind: ChannelKind::Network,
				adapter_type: adapter_type.into(),
				initiate,
				outbound: OutboundSink::Frames(outbound_tx),
				reply: reply_tx,
			})
			.map_err(|_| Error::Shutdown)?;
		let channel_id = reply_rx.await.map_err(|_| Error::Shutdown)?;
		Ok((channel_id, outbound_rx))
	}

	/// Push one raw transport message (a frame or fragment) for reassembly
	/// and dispatch.
	pub fn inbound_frame(&self, channel_id: ChannelId, bytes: Vec<u8>) {
		let _ = self.ops.send(Op::InboundFrame { channel_id, bytes });
	}

	/// Push one already reassembled and decoded message, for transports
	/// that run the reassembler at their own boundary (HTTP POST bodies).
	pub fn inbound_msg(&self, channel_id: ChannelId, msg: ChannelMsg) {
		let _ = self.ops.send(Op::InboundMsg { channel_id, msg });
	}

	/// The transport closed or faulted; the channel is removed.
	pub fn close_channel(&self, channel_id: ChannelId) {
		let _ = self.ops.send(Op::CloseChannel { channel_id });
	}
}

/// Lifecycle contract for network transports (WebSocket, SSE, bridge…).
#[async_trait]
pub trait NetworkAdapter: Send {
	/// Transport label used for channel records and logs.
	fn adapter_type(&self) -> &'static str;

	/// Bring the transport up and start registering channels.
	async fn start(&mut self, ctx: AdapterCtx) -> VelResult<()>;

	/// Tear the transport down. Channels are closed via the ctx.
	async fn stop(&mut self) -> VelResult<()>;
}

// vim: ts=4
