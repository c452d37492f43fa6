//! Error types for cabinetdb.
//!
//! This is the canonical error type for all store operations. Reading a
//! missing `(collection, key)` is not an error: reads report absence through
//! `Option` and existence checks return `false`.

use thiserror::Error;

/// All cabinetdb errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage backend rejected a statement, begin, commit, or rollback.
    ///
    /// The enclosing transaction has been fully rolled back; the database is
    /// left as if the transaction never ran.
    #[error("storage error: {0}")]
    Storage(String),

    /// A value could not be serialized by the configured codec.
    #[error("encode error: {0}")]
    Encode(String),

    /// Stored bytes could not be deserialized by the configured codec.
    ///
    /// Surfaced at the point of deserialization; the failed entry is never
    /// cached as present.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation attempted on a closed connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Caller-error on the API contract (invalid arguments, misuse).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error outside the storage engine proper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cabinetdb operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a decode error.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }

    /// Check if this error came from the storage backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
