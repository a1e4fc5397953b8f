//! WebSocket server transport.
//!
//! Exposes an axum router with a single upgrade route. Each accepted socket
//! becomes one channel; binary frames go straight through the framing layer,
//! text frames are rejected. The server side never initiates establishment;
//! the connecting client does.

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::sync::{Arc, RwLock};

use vellum_core::network::{AdapterCtx, NetworkAdapter};
use vellum_types::prelude::*;

#[derive(Default)]
struct ServerShared {
	ctx: RwLock<Option<AdapterCtx>>,
}

/// WebSocket server adapter. Mount [`WsServerAdapter::router`] into the
/// application's axum server; connections are accepted once the repo has
/// started the adapter.
#[derive(Clone, Default)]
pub struct WsServerAdapter {
	shared: Arc<ServerShared>,
}

impl WsServerAdapter {
	pub fn new() -> WsServerAdapter {
		WsServerAdapter::default()
	}

	/// Router serving the sync socket at `/sync/ws`.
	pub fn router(&self) -> Router {
		Router::new()
			.route("/sync/ws", any(ws_upgrade))
			.with_state(self.shared.clone())
	}
}

#[async_trait]
impl NetworkAdapter for WsServerAdapter {
	fn adapter_type(&self) -> &'static str {
		"websocket-server"
	}

	async fn start(&mut self, ctx: AdapterCtx) -> VelResult<()> {
		*self
			.shared
			.ctx
			.write()
			.map_err(|_| Error::Internal("ws server state poisoned".into()))? = Some(ctx);
		Ok(())
	}

	async fn stop(&mut self) -> VelResult<()> {
		*self
			.shared
			.ctx
			.write()
			.map_err(|_| Error::Internal("ws server state poisoned".into()))? = None;
		Ok(())
	}
}

async fn ws_upgrade(
	State(shared): State<Arc<ServerShared>>,
	upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
	upgrade.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<ServerShared>) {
	let ctx = match shared.ctx.read().ok().and_then(|guard| guard.clone()) {
		Some(ctx) => ctx,
		None => {
			debug!("sync socket rejected: adapter not started");
			return;
		}
	};
	let (channel_id, mut outbound_rx) = match ctx.register_channel("websocket-server", false).await
	{
		Ok(registered) => registered,
		Err(err) => {
			warn!("cannot register websocket channel: {}", err);
			return;
		}
	};
	info!("websocket connection opened on channel {}", channel_id);

	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(frame) = outbound_rx.recv().await {
			if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Binary(data)) => ctx.inbound_frame(channel_id, data.to_vec()),
			Ok(Message::Close(_)) => break,
			Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
			Ok(Message::Text(_)) => {
				warn!("channel {}: sync protocol expects binary frames", channel_id);
			}
			Err(err) => {
				warn!("channel {}: {}", channel_id, err);
				break;
			}
		}
	}

	send_task.abort();
	ctx.close_channel(channel_id);
	info!("websocket connection closed on channel {}", channel_id);
}

// vim: ts=4
