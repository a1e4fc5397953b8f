//! Shared types, wire messages, adapter traits, and error types for the
//! Vellum sync engine.
//!
//! This crate contains everything that both the synchronizer core and the
//! adapter implementations need to agree on: identifiers, the channel
//! message taxonomy, version vectors, the storage adapter contract, the
//! permission rule model, and the common error type. Extracting these into a
//! separate crate lets adapter crates compile in parallel with the core.

pub mod error;
pub mod message;
pub mod permissions;
pub mod prelude;
pub mod storage_adapter;
pub mod types;
pub mod version;

// vim: ts=4
