//! Storage error types.

use crate::ObjectId;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object is not in the store.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A stored object failed to decompress or its header did not parse.
    #[error("corrupt object: {0}")]
    Corrupt(String),

    /// A tree body ended where a 20-byte hash was expected.
    #[error("truncated tree at byte {offset}")]
    TruncatedTree {
        /// Offset into the tree body where the entry started.
        offset: usize,
    },

    /// Malformed identifier, type name, or object body.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// The requested reference does not exist.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// The reference file could not be interpreted.
    #[error("invalid ref: {0}")]
    InvalidRef(String),
}
