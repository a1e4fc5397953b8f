//! Error types for the redb storage adapter

use std::fmt;

/// Adapter-specific errors
#[derive(Debug)]
pub enum Error {
	/// Database operation error
	DbError(String),

	/// I/O error
	IoError(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::DbError(msg) => write!(f, "Database error: {}", msg),
			Error::IoError(msg) => write!(f, "I/O error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<Error> for vellum::error::Error {
	fn from(err: Error) -> Self {
		vellum::error::Error::StorageFault(err.to_string())
	}
}

// vim: ts=4
