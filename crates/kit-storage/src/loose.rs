//! On-disk loose object store.
//!
//! Each object lives at `<objects>/<first 2 hex>/<remaining 38 hex>` as a
//! zlib stream of its header-prefixed payload. Files are written to a
//! temporary path in the same fan-out directory and renamed into place,
//! so concurrent writers of the same id never expose a partial file.

use crate::compression::{deflate_object, inflate_object};
use crate::{
    CompressionStats, GitObject, ObjectId, ObjectStore, RepoConfig, Result, StorageError,
};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Loose object store rooted at a repository's `objects` directory.
#[derive(Debug)]
pub struct LooseObjectStore {
    config: RepoConfig,
    objects_dir: PathBuf,
    stats: CompressionStats,
}

impl LooseObjectStore {
    /// Opens the store of an existing repository.
    pub fn open(config: &RepoConfig) -> Result<Self> {
        let objects_dir = config.objects_dir();
        if !objects_dir.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("not a repository: {}", config.git_dir().display()),
            )));
        }
        Ok(Self {
            config: config.clone(),
            objects_dir,
            stats: CompressionStats::new(),
        })
    }

    /// Creates the repository layout (if needed) and opens the store.
    ///
    /// Lays down `objects/`, `refs/heads/`, `refs/tags/` and a `HEAD`
    /// pointing at `refs/heads/main` unless one already exists.
    pub fn init(config: &RepoConfig) -> Result<Self> {
        let git_dir = config.git_dir();
        fs::create_dir_all(config.objects_dir())?;
        fs::create_dir_all(config.refs_dir().join("heads"))?;
        fs::create_dir_all(config.refs_dir().join("tags"))?;

        let head = git_dir.join("HEAD");
        if !head.exists() {
            fs::write(&head, "ref: refs/heads/main\n")?;
        }

        tracing::info!(git_dir = %git_dir.display(), "initialized repository");
        Self::open(config)
    }

    /// Returns the path an object id maps to.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Returns compression statistics accumulated by this handle.
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    fn write_atomic(&self, dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        if self.config.fsync {
            tmp.as_file().sync_all()?;
        }
        match tmp.persist(path) {
            Ok(_) => Ok(()),
            // Another writer won the race; content is identical by hash.
            Err(e) if path.exists() => {
                tracing::trace!(path = %path.display(), error = %e.error, "object appeared concurrently");
                Ok(())
            }
            Err(e) => Err(e.error.into()),
        }
    }
}

impl ObjectStore for LooseObjectStore {
    fn put_object(&self, object: &GitObject) -> Result<ObjectId> {
        let id = object.id;
        let path = self.object_path(&id);
        if path.exists() {
            tracing::trace!(id = %id, "object already stored");
            return Ok(id);
        }

        let compressed = deflate_object(object, self.config.compression)?;
        self.stats
            .record_compress(object.data.len() as u64, compressed.len() as u64);

        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidObject(format!("no fan-out dir for {}", id)))?;
        self.write_atomic(dir, &path, &compressed)?;

        tracing::debug!(id = %id, kind = %object.object_type, size = object.data.len(), "wrote loose object");
        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Result<GitObject> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(*id))
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.record_decompress();

        let object = inflate_object(&compressed)?;
        if object.id != *id {
            return Err(StorageError::Corrupt(format!(
                "object {} hashes to {}",
                id, object.id
            )));
        }
        Ok(object)
    }

    fn exists(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        for fan_out in fs::read_dir(&self.objects_dir)? {
            let fan_out = fan_out?;
            let name = fan_out.file_name();
            let is_fan_out = name.len() == 2
                && name
                    .to_str()
                    .is_some_and(|n| n.bytes().all(|b| b.is_ascii_hexdigit()));
            if !is_fan_out || !fan_out.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(fan_out.path())? {
                if entry?.file_name().len() == 38 {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
