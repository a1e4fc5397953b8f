//! HTTP transports: Server-Sent Events downstream with POST upstream, and a
//! long-polling variant sharing the same upload path.
//!
//! Flow: the client POSTs `/sync/connect` to obtain a connection id, then
//! either opens `/sync/events/{conn}` (SSE downstream) or repeatedly GETs
//! `/sync/poll/{conn}` (long-polling), while uploading frames with POST
//! `/sync/message/{conn}`. POST bodies carry one frame each; fragments are
//! reassembled per connection by [`parse_post_body`].

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngExt;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use vellum_core::network::{AdapterCtx, NetworkAdapter};
use vellum_proto::codec::decode_msg;
use vellum_proto::reassembler::{Reassembler, Reassembly};
use vellum_types::message::ChannelMsg;
use vellum_types::prelude::*;

const CONNECTION_ID_LENGTH: usize = 24;
/// How long a poll request waits for traffic before returning empty.
const POLL_WAIT: Duration = Duration::from_secs(25);

/// Result of feeding one POST body into a connection's reassembler.
#[derive(Debug)]
pub enum PostBody {
	/// A complete frame decoded into messages.
	Messages(Vec<ChannelMsg>),
	/// The body was a fragment; more are needed.
	Pending,
}

/// Feed one upload body (a frame or fragment) through a connection's
/// reassembler. Decode failures never yield partial messages.
pub fn parse_post_body(reassembler: &mut Reassembler, body: &[u8]) -> VelResult<PostBody> {
	match reassembler.accept(body)? {
		Reassembly::Complete(payload) => Ok(PostBody::Messages(vec![decode_msg(&payload)?])),
		Reassembly::Pending => Ok(PostBody::Pending),
	}
}

struct Connection {
	channel_id: ChannelId,
	reassembler: Reassembler,
	/// Present until the SSE stream (permanently) or a poll request
	/// (temporarily) takes it.
	outbound_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[derive(Default)]
struct HttpShared {
	ctx: std::sync::RwLock<Option<AdapterCtx>>,
	connections: Mutex<HashMap<String, Connection>>,
}

/// SSE / long-polling server adapter. Mount [`HttpServerAdapter::router`]
/// into the application's axum server.
#[derive(Clone, Default)]
pub struct HttpServerAdapter {
	shared: Arc<HttpShared>,
}

impl HttpServerAdapter {
	pub fn new() -> HttpServerAdapter {
		HttpServerAdapter::default()
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/sync/connect", post(connect))
			.route("/sync/events/{conn_id}", get(events))
			.route("/sync/message/{conn_id}", post(message))
			.route("/sync/poll/{conn_id}", get(poll))
			.with_state(self.shared.clone())
	}
}

#[async_trait]
impl NetworkAdapter for HttpServerAdapter {
	fn adapter_type(&self) -> &'static str {
		"http-server"
	}

	async fn start(&mut self, ctx: AdapterCtx) -> VelResult<()> {
		*self
			.shared
			.ctx
			.write()
			.map_err(|_| Error::Internal("http server state poisoned".into()))? = Some(ctx);
		Ok(())
	}

	async fn stop(&mut self) -> VelResult<()> {
		*self
			.shared
			.ctx
			.write()
			.map_err(|_| Error::Internal("http server state poisoned".into()))? = None;
		let mut connections = self.shared.connections.lock().await;
		connections.clear();
		Ok(())
	}
}

fn connection_id() -> String {
	const SAFE: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
	let mut rng = rand::rng();
	(0..CONNECTION_ID_LENGTH)
		.map(|_| SAFE[rng.random_range(0..SAFE.len())] as char)
		.collect()
}

#[derive(Serialize)]
struct ConnectResponse {
	connection_id: String,
}

async fn connect(State(shared): State<Arc<HttpShared>>) -> impl IntoResponse {
	let Some(ctx) = shared.ctx.read().ok().and_then(|guard| guard.clone()) else {
		return StatusCode::SERVICE_UNAVAILABLE.into_response();
	};
	let (channel_id, outbound_rx) = match ctx.register_channel("http-server", false).await {
		Ok(registered) => registered,
		Err(err) => {
			warn!("cannot register http channel: {}", err);
			return StatusCode::SERVICE_UNAVAILABLE.into_response();
		}
	};
	let conn_id = connection_id();
	let connection = Connection {
		channel_id,
		reassembler: Reassembler::default(),
		outbound_rx: Some(outbound_rx),
	};
	shared.connections.lock().await.insert(conn_id.clone(), connection);
	info!("http connection {} opened on channel {}", conn_id, channel_id);
	axum::Json(ConnectResponse { connection_id: conn_id }).into_response()
}

/// SSE downstream: every outbound frame becomes one event, base64 encoded.
async fn events(
	State(shared): State<Arc<HttpShared>>,
	Path(conn_id): Path<String>,
) -> impl IntoResponse {
	let mut connections = shared.connections.lock().await;
	let Some(connection) = connections.get_mut(&conn_id) else {
		return StatusCode::NOT_FOUND.into_response();
	};
	let Some(outbound_rx) = connection.outbound_rx.take() else {
		return StatusCode::CONFLICT.into_response();
	};
	drop(connections);

	let stream = UnboundedReceiverStream::new(outbound_rx)
		.map(|frame| Ok::<_, Infallible>(Event::default().data(STANDARD.encode(frame))));
	Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Upstream for both SSE and long-polling clients.
async fn message(
	State(shared): State<Arc<HttpShared>>,
	Path(conn_id): Path<String>,
	body: axum::body::Bytes,
) -> impl IntoResponse {
	let Some(ctx) = shared.ctx.read().ok().and_then(|guard| guard.clone()) else {
		return StatusCode::SERVICE_UNAVAILABLE;
	};
	let mut connections = shared.connections.lock().await;
	let Some(connection) = connections.get_mut(&conn_id) else {
		return StatusCode::NOT_FOUND;
	};
	match parse_post_body(&mut connection.reassembler, &body) {
		Ok(PostBody::Messages(messages)) => {
			let channel_id = connection.channel_id;
			drop(connections);
			for msg in messages {
				ctx.inbound_msg(channel_id, msg);
			}
			StatusCode::ACCEPTED
		}
		Ok(PostBody::Pending) => StatusCode::ACCEPTED,
		Err(err) => {
			// connection state survives a bad message
			warn!("http connection {}: {}", conn_id, err);
			StatusCode::BAD_REQUEST
		}
	}
}

/// Long-polling downstream: waits for traffic, then drains what is queued.
/// The response body is a CBOR array of frames.
async fn poll(
	State(shared): State<Arc<HttpShared>>,
	Path(conn_id): Path<String>,
) -> impl IntoResponse {
	let mut outbound_rx = {
		let mut connections = shared.connections.lock().await;
		let Some(connection) = connections.get_mut(&conn_id) else {
			return StatusCode::NOT_FOUND.into_response();
		};
		match connection.outbound_rx.take() {
			Some(outbound_rx) => outbound_rx,
			None => return StatusCode::CONFLICT.into_response(),
		}
	};

	let mut frames: Vec<serde_bytes::ByteBuf> = Vec::new();
	if let Ok(Some(first)) = tokio::time::timeout(POLL_WAIT, outbound_rx.recv()).await {
		frames.push(serde_bytes::ByteBuf::from(first));
		while let Ok(frame) = outbound_rx.try_recv() {
			frames.push(serde_bytes::ByteBuf::from(frame));
		}
	}

	// hand the receiver back for the next poll
	{
		let mut connections = shared.connections.lock().await;
		if let Some(connection) = connections.get_mut(&conn_id) {
			connection.outbound_rx = Some(outbound_rx);
		}
	}

	let mut body = Vec::new();
	if let Err(err) = ciborium::ser::into_writer(&frames, &mut body) {
		warn!("http connection {}: poll encode failed: {}", conn_id, err);
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}
	(StatusCode::OK, body).into_response()
}

#[cfg(test)]
mod tests {
	use super::*;
	use vellum_proto::frame::{encode_fragments, encode_single};
	use vellum_proto::codec::encode_msg;

	#[test]
	fn post_body_single_frame_decodes() {
		let msg = ChannelMsg::DirectoryRequest;
		let frame = encode_single(&encode_msg(&msg).unwrap());
		let mut reassembler = Reassembler::default();
		match parse_post_body(&mut reassembler, &frame).unwrap() {
			PostBody::Messages(messages) => assert_eq!(messages, vec![msg]),
			PostBody::Pending => panic!("expected messages"),
		}
	}

	#[test]
	fn post_body_fragments_reassemble_out_of_order() {
		// a ~300 KB message split into 64 KB chunks
		let msg = ChannelMsg::SyncResponse {
			doc_id: DocId::from("big"),
			transmission: vellum_types::message::Transmission::Update {
				data: vec![0xab; 300 * 1024],
				to_version: VersionVec::new(),
			},
		};
		let payload = encode_msg(&msg).unwrap();
		let frames = encode_fragments(&payload, 64 * 1024, 1);
		assert_eq!(frames.len(), 5);

		let mut reassembler = Reassembler::default();
		for index in [3usize, 1, 0, 4] {
			match parse_post_body(&mut reassembler, &frames[index]).unwrap() {
				PostBody::Pending => {}
				PostBody::Messages(_) => panic!("incomplete group must stay pending"),
			}
		}
		match parse_post_body(&mut reassembler, &frames[2]).unwrap() {
			PostBody::Messages(messages) => assert_eq!(messages, vec![msg]),
			PostBody::Pending => panic!("expected completion"),
		}
	}

	#[test]
	fn post_body_garbage_is_a_decode_error() {
		let mut reassembler = Reassembler::default();
		assert!(parse_post_body(&mut reassembler, &[0xff, 0x00]).is_err());
	}
}

// vim: ts=4
