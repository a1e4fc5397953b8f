//! Network transports for the Vellum sync engine.
//!
//! Every transport treats sync traffic as opaque framed bytes; the framing
//! and the message codec live in `vellum-proto`, the channel semantics in
//! `vellum-core`. Provided here:
//!
//! - WebSocket server (axum) and client (tokio-tungstenite)
//! - Server-Sent Events downstream paired with HTTP POST upstream,
//!   including fragment reassembly over POST bodies
//! - HTTP long-polling sharing the same POST upload path
//! - An in-process bridge for tests and same-process repos

pub mod bridge;
pub mod http_server;
pub mod ws_client;
pub mod ws_server;

pub use bridge::{BridgeAdapter, bridge_pair};
pub use http_server::{HttpServerAdapter, PostBody, parse_post_body};
pub use ws_client::WsClientAdapter;
pub use ws_server::WsServerAdapter;

// vim: ts=4
