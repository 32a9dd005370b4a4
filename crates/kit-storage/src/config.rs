//! Repository configuration.

use crate::CompressionLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a repository on disk.
///
/// The root is always explicit; nothing in this crate consults the
/// process working directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Working tree root. The git directory is `<root>/.git`.
    pub root: PathBuf,
    /// zlib level for newly written loose objects.
    pub compression: CompressionLevel,
    /// Sync object files to disk before they are moved into place.
    pub fsync: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            compression: CompressionLevel::Default,
            fsync: false,
        }
    }
}

impl RepoConfig {
    /// Creates a configuration rooted at `root` with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Returns the `.git` directory.
    pub fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }

    /// Returns the loose object directory.
    pub fn objects_dir(&self) -> PathBuf {
        self.git_dir().join("objects")
    }

    /// Returns the directory holding ref files.
    pub fn refs_dir(&self) -> PathBuf {
        self.git_dir().join("refs")
    }

    /// Returns the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
