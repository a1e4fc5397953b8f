pub use crate::error::{Error, VelResult};
pub use crate::types::{ChannelId, ChannelKind, DocId, Identity, IdentityKind, PeerId, Timestamp};
pub use crate::version::VersionVec;

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
