//! Git protocol error types.

use kit_storage::ObjectId;
use thiserror::Error;

/// Errors that can occur during git protocol operations.
///
/// Everything except the transport conditions describes bad data and
/// is terminal for the pack or clone being processed.
#[derive(Debug, Error)]
pub enum GitError {
    /// A variable-length integer ended mid-continuation or overflowed.
    #[error("malformed varint: {0}")]
    MalformedVarInt(String),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The ref advertisement contained no refs.
    #[error("no refs advertised")]
    NoRefsAdvertised,

    /// The requested ref is not in the advertisement.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Invalid pack file structure (magic, version, truncation).
    #[error("invalid pack file: {0}")]
    InvalidPack(String),

    /// The pack trailer does not match the SHA-1 of the pack contents.
    #[error("pack checksum mismatch: expected {expected}, computed {computed}")]
    PackChecksumMismatch {
        /// Trailer carried by the pack.
        expected: String,
        /// Hash of the bytes actually received.
        computed: String,
    },

    /// An entry inflated to a different length than its header declared.
    #[error("entry at offset {offset} declared {declared} bytes, inflated to {actual}")]
    SizeMismatch {
        /// Stream position of the entry.
        offset: u64,
        /// Size from the entry header.
        declared: u64,
        /// Size actually produced.
        actual: u64,
    },

    /// A delta's base or result length disagrees with its header.
    #[error("delta {what} size mismatch: expected {expected}, got {actual}")]
    DeltaSizeMismatch {
        /// `"base"` or `"result"`.
        what: &'static str,
        /// Size declared in the delta header.
        expected: u64,
        /// Size observed.
        actual: u64,
    },

    /// A delta instruction is invalid or out of bounds.
    #[error("malformed delta instruction: {0}")]
    MalformedDeltaInstruction(String),

    /// An entry's base chain leads back to itself.
    #[error("delta cycle detected at pack offset {0}")]
    DeltaCycleDetected(u64),

    /// A delta base is neither in the pack nor in the local store.
    #[error("delta base not found: {0}")]
    MissingBase(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The request could not be completed at all.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kit_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns true for network-level failures worth retrying.
    ///
    /// Protocol and data errors return false: the same bytes would fail
    /// the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn missing_ref_base(id: &ObjectId) -> Self {
        Self::MissingBase(id.to_hex())
    }
}
