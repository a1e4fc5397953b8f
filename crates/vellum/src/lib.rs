//! Vellum is a client-server library for collaborative CRDT document
//! synchronization built on a content-addressed operation log.
//!
//! # Features
//!
//! - Deterministic, message-driven synchronizer (pure reducer + executor)
//! - Channel abstraction over storage backends and network peers
//! - Document discovery, snapshot/delta transfer, multi-hop propagation
//! - Ephemeral (presence) data with heartbeat refresh and receiver expiry
//! - Pluggable permission rules over (peer, doc, channel) context
//! - Transports: WebSocket, SSE + POST, long-polling, in-process bridge
//! - Storage adapters: in-memory, filesystem, redb

// Re-export shared types and the adapter contract from vellum-types
pub use vellum_types::error;
pub use vellum_types::message;
pub use vellum_types::permissions;
pub use vellum_types::storage_adapter;
pub use vellum_types::types;
pub use vellum_types::version;

// Wire framing and codec
pub use vellum_proto as proto;

// Synchronizer core and application surface
pub use vellum_core::batcher;
pub use vellum_core::channels;
pub use vellum_core::doc;
pub use vellum_core::ephemeral;
pub use vellum_core::handle;
pub use vellum_core::model;
pub use vellum_core::network;
pub use vellum_core::repo;
pub use vellum_core::synchronizer;
pub use vellum_core::loro;

// Transports
pub use vellum_net as net;

pub mod prelude;

pub use vellum_core::{Doc, Handle, Presence, Repo, RepoBuilder, SharedDoc, SyncConfig};

// vim: ts=4
