//! WebSocket client transport.
//!
//! Connects to a remote sync endpoint and initiates establishment. One
//! adapter drives one connection; reconnection policy belongs to the
//! application, which can stop and start a fresh adapter.

use async_trait::async_trait;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vellum_core::network::{AdapterCtx, NetworkAdapter};
use vellum_types::prelude::*;

pub struct WsClientAdapter {
	url: String,
	channel: Option<(AdapterCtx, ChannelId)>,
	tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl WsClientAdapter {
	/// `url` is a `ws://` or `wss://` endpoint serving the sync socket.
	pub fn new(url: impl Into<String>) -> WsClientAdapter {
		WsClientAdapter { url: url.into(), channel: None, tasks: Vec::new() }
	}
}

#[async_trait]
impl NetworkAdapter for WsClientAdapter {
	fn adapter_type(&self) -> &'static str {
		"websocket-client"
	}

	async fn start(&mut self, ctx: AdapterCtx) -> VelResult<()> {
		let (stream, _response) = connect_async(self.url.as_str())
			.await
			.map_err(|err| Error::AdapterFault(format!("connect {}: {}", self.url, err)))?;
		let (mut ws_tx, mut ws_rx) = stream.split();

		let (channel_id, mut outbound_rx) = ctx.register_channel("websocket-client", true).await?;
		self.channel = Some((ctx.clone(), channel_id));
		info!("connected to {} on channel {}", self.url, channel_id);

		self.tasks.push(tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if ws_tx.send(Message::Binary(frame)).await.is_err() {
					break;
				}
			}
		}));

		self.tasks.push(tokio::spawn(async move {
			while let Some(msg) = ws_rx.next().await {
				match msg {
					Ok(Message::Binary(data)) => ctx.inbound_frame(channel_id, data),
					Ok(Message::Close(_)) => break,
					Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
					Ok(Message::Text(_)) => {
						warn!("channel {}: sync protocol expects binary frames", channel_id);
					}
					Err(err) => {
						warn!("channel {}: {}", channel_id, err);
						break;
					}
				}
			}
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
