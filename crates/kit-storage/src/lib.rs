//! Object storage for kit.
//!
//! This crate provides content-addressed storage for git objects
//! (blobs, trees, commits, tags), the binary tree codec, and on-disk
//! reference management for a repository rooted at an explicit path.

mod compression;
mod config;
mod error;
mod loose;
mod object;
mod refs;
mod store;
mod traits;
pub mod tree;

pub use compression::{CompressionLevel, CompressionStats, CompressionStatsSnapshot};
pub use config::RepoConfig;
pub use error::StorageError;
pub use loose::LooseObjectStore;
pub use object::{Commit, GitObject, ObjectId, ObjectType};
pub use refs::{RefStore, Reference};
pub use store::MemoryStore;
pub use traits::ObjectStore;
pub use tree::TreeEntry;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
