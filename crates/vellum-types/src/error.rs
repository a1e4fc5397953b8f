//! Error handling subsystem. Implements the common Error type shared by the
//! core and all adapters.

pub type VelResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Framing, CBOR or LEB128 decoding failure. The connection survives,
	/// the offending message is dropped.
	Decode(String),

	/// A permission predicate returned false. Dropped silently so document
	/// existence is not leaked.
	Unauthorized,

	/// Document not held locally and storage had nothing.
	Unavailable,

	/// A fragment reassembly group expired before completion.
	StaleFragments,

	/// Transport closed or a send failed; the channel gets removed.
	AdapterFault(String),

	/// Storage load/save failed. Logged and retried on the next change.
	StorageFault(String),

	/// A peer id failed validation (non-decimal, leading zeros, overflow).
	CorruptPeerId(String),

	/// Operation timed out (wait_for_sync, flush).
	Timeout,

	/// The repo is shutting down; pending waiters are cancelled.
	Shutdown,

	/// Requested document or channel is not known.
	NotFound,

	/// Missing or invalid configuration.
	Config(String),

	/// Internal invariant violations, for debugging.
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::Decode(msg) => write!(f, "decode failed: {}", msg),
			Error::Unauthorized => write!(f, "unauthorized"),
			Error::Unavailable => write!(f, "document unavailable"),
			Error::StaleFragments => write!(f, "stale fragments"),
			Error::AdapterFault(msg) => write!(f, "adapter fault: {}", msg),
			Error::StorageFault(msg) => write!(f, "storage fault: {}", msg),
			Error::CorruptPeerId(msg) => write!(f, "corrupt peer id: {}", msg),
			Error::Timeout => write!(f, "operation timed out"),
			Error::Shutdown => write!(f, "repo is shut down"),
			Error::NotFound => write!(f, "not found"),
			Error::Config(msg) => write!(f, "config error: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

// vim: ts=4
