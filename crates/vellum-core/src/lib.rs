//! Vellum synchronizer core.
//!
//! The deterministic, message-driven state machine that coordinates storage
//! and network channels, negotiates peer identity, discovers documents,
//! transfers CRDT state, propagates local edits, and carries expiring
//! ephemeral data, plus the executor that interprets its commands and the
//! `Repo`/`Handle` API applications build on.

pub mod batcher;
pub mod channels;
pub mod doc;
pub mod ephemeral;
mod executor;
pub mod handle;
pub mod model;
pub mod network;
pub mod prelude;
pub mod repo;
mod storage_channel;
pub mod synchronizer;

pub use doc::{Doc, SharedDoc};
pub use handle::{Handle, Presence};
pub use model::SyncConfig;
pub use network::{AdapterCtx, Clock, NetworkAdapter, PresenceUpdate, SyncEvent};
pub use repo::{Repo, RepoBuilder};

// re-exported so applications can type their `change` closures
pub use loro;

// vim: ts=4
