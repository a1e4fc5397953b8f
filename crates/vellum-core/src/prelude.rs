pub use vellum_types::error::{Error, VelResult};
pub use vellum_types::types::{
	ChannelId, ChannelKind, DocId, Identity, IdentityKind, PeerId, Timestamp,
};
pub use vellum_types::version::VersionVec;

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
