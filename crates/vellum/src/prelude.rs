pub use vellum_core::network::{AdapterCtx, NetworkAdapter, PresenceUpdate, SyncEvent};
pub use vellum_core::{Doc, Handle, Presence, Repo, RepoBuilder, SharedDoc, SyncConfig};
pub use vellum_types::error::{Error, VelResult};
pub use vellum_types::permissions::{PermissionCtx, Permissions};
pub use vellum_types::storage_adapter::{StorageAdapter, StorageEntry};
pub use vellum_types::types::{
	ChannelId, ChannelKind, DocId, Identity, IdentityKind, PeerId, Timestamp,
};
pub use vellum_types::version::VersionVec;

// vim: ts=4
