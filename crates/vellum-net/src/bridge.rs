//! In-process bridge transport.
//!
//! Two repos in the same process get a pair of adapters whose frames cross
//! over unbounded channels. The full framing and codec path is exercised,
//! so bridge-based tests cover the same bytes a socket would carry.

use async_trait::async_trait;
use tokio::sync::mpsc;

use vellum_core::network::{AdapterCtx, NetworkAdapter};
use vellum_types::prelude::*;

/// One side of an in-process connection. Create both with [`bridge_pair`]
/// and register each with its repo.
pub struct BridgeAdapter {
	send: mpsc::UnboundedSender<Vec<u8>>,
	recv: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
	initiate: bool,
	channel: Option<(AdapterCtx, ChannelId)>,
	tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// A connected pair of bridge endpoints. The first endpoint initiates the
/// handshake.
pub fn bridge_pair() -> (BridgeAdapter, BridgeAdapter) {
	let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
	let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
	(
		BridgeAdapter {
			send: a_to_b_tx,
			recv: Some(b_to_a_rx),
			initiate: true,
			channel: None,
			tasks: Vec::new(),
		},
		BridgeAdapter {
			send: b_to_a_tx,
			recv: Some(a_to_b_rx),
			initiate: false,
			channel: None,
			tasks: Vec::new(),
		},
	)
}

#[async_trait]
impl NetworkAdapter for BridgeAdapter {
	fn adapter_type(&self) -> &'static str {
		"bridge"
	}

	async fn start(&mut self, ctx: AdapterCtx) -> VelResult<()> {
		let (channel_id, mut outbound_rx) = ctx.register_channel("bridge", self.initiate).await?;
		self.channel = Some((ctx.clone(), channel_id));

		let send = self.send.clone();
		self.tasks.push(tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if send.send(frame).is_err() {
					break;
				}
			}
		}));

		let mut recv = self
			.recv
			.take()
			.ok_or_else(|| Error::Config("bridge endpoint started twice".into()))?;
		self.tasks.push(tokio::spawn(async move {
			while let Some(frame) = recv.recv().await {
				ctx.inbound_frame(channel_id, frame);
			}
			// the far side hung up
			ctx.close_channel(channel_id);
		}));
		Ok(())
	}

	async fn stop(&mut self) -> VelResult<()> {
		for task in self.tasks.drain(..) {
			task.abort();
		}
		if let Some((ctx, channel_id)) = self.channel.take() {
			ctx.close_channel(channel_id);
		}
		Ok(())
	}
}

// vim: ts=4
