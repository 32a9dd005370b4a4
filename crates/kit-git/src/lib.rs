//! Git wire protocol and pack handling for kit.
//!
//! This crate implements the client side of a smart HTTP clone:
//!
//! - pkt-line framing and the ref advertisement / want negotiation
//! - pack file parsing with checksum verification
//! - delta application and resolution of ofs/ref delta chains
//! - a clone orchestrator that persists resolved objects into a
//!   [`kit_storage::ObjectStore`]

pub mod clone;
pub mod delta;
mod error;
pub mod pack;
pub mod pktline;
pub mod protocol;
pub mod stats;
pub mod transport;
pub mod varint;

pub use clone::{clone_repository, CloneOptions, CloneOutcome};
pub use delta::{apply_delta, resolve_pack, Delta, DeltaInstruction, DeltaResolver};
pub use error::GitError;
pub use pack::{EntryKind, Pack, PackBuilder, PackEntry, PackParser};
pub use pktline::PktLine;
pub use protocol::{Advertisement, Ref};
pub use stats::{PackStats, PackStatsSnapshot};
pub use transport::{HttpTransport, Transport};

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;
