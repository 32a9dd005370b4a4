//! Git reference management.
//!
//! References are plain files under `.git/`: a direct ref holds a
//! 40-hex id, a symbolic ref holds `ref: <target>`.

use crate::{ObjectId, RepoConfig, Result, StorageError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Maximum symbolic indirections followed before giving up.
const MAX_SYMREF_DEPTH: usize = 5;

/// A git reference (branch, tag, or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    fn parse(name: &str, contents: &str) -> Result<Self> {
        let contents = contents.trim_end();
        if let Some(target) = contents.strip_prefix("ref: ") {
            return Ok(Self::Symbolic(target.to_string()));
        }
        ObjectId::from_hex(contents)
            .map(Self::Direct)
            .map_err(|_| StorageError::InvalidRef(format!("{}: {:?}", name, contents)))
    }

    fn serialize(&self) -> String {
        match self {
            Self::Direct(id) => format!("{}\n", id),
            Self::Symbolic(target) => format!("ref: {}\n", target),
        }
    }
}

/// Reference store backed by the repository's `.git` directory.
#[derive(Debug, Clone)]
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    /// Creates a reference store for the given repository.
    pub fn new(config: &RepoConfig) -> Self {
        Self {
            git_dir: config.git_dir(),
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        let valid = name == "HEAD"
            || (name.starts_with("refs/")
                && !name.split('/').any(|c| c.is_empty() || c == "." || c == ".."));
        if !valid {
            return Err(StorageError::InvalidRef(name.to_string()));
        }
        Ok(self.git_dir.join(name))
    }

    /// Gets a reference by name.
    pub fn get(&self, name: &str) -> Result<Reference> {
        match fs::read_to_string(self.path(name)?) {
            Ok(contents) => Reference::parse(name, &contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::RefNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sets a reference to point to an object.
    pub fn set(&self, name: &str, target: ObjectId) -> Result<()> {
        self.write(name, &Reference::Direct(target))
    }

    /// Sets a symbolic reference.
    pub fn set_symbolic(&self, name: &str, target: &str) -> Result<()> {
        self.write(name, &Reference::Symbolic(target.to_string()))
    }

    fn write(&self, name: &str, reference: &Reference) -> Result<()> {
        let path = self.path(name)?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidRef(name.to_string()))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(reference.serialize().as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(name = %name, reference = ?reference, "updated ref");
        Ok(())
    }

    /// Follows symbolic references until a direct one is reached.
    pub fn resolve(&self, name: &str) -> Result<ObjectId> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.get(&current)? {
                Reference::Direct(id) => return Ok(id),
                Reference::Symbolic(target) => current = target,
            }
        }
        Err(StorageError::InvalidRef(format!(
            "{}: too many levels of symbolic refs",
            name
        )))
    }

    /// Resolves HEAD to a commit id.
    pub fn resolve_head(&self) -> Result<ObjectId> {
        self.resolve("HEAD")
    }

    /// Gets the current branch name (if HEAD is symbolic).
    pub fn current_branch(&self) -> Option<String> {
        match self.get("HEAD").ok()? {
            Reference::Symbolic(target) => {
                target.strip_prefix("refs/heads/").map(|s| s.to_string())
            }
            Reference::Direct(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn refs() -> (TempDir, RefStore) {
        let dir = TempDir::new().unwrap();
        let store = RefStore::new(&RepoConfig::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn test_ref_store_basic() {
        let (_dir, store) = refs();
        let id = ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3").unwrap();

        store.set("refs/heads/main", id).unwrap();
        store.set_symbolic("HEAD", "refs/heads/main").unwrap();

        assert_eq!(store.current_branch(), Some("main".to_string()));
        assert_eq!(store.resolve_head().unwrap(), id);
        assert_eq!(store.get("refs/heads/main").unwrap().as_direct(), Some(id));
    }

    #[test]
    fn test_ref_file_format() {
        let (dir, store) = refs();
        let id = ObjectId::from_bytes([0xcd; 20]);
        store.set("refs/heads/master", id).unwrap();
        let contents = fs::read_to_string(dir.path().join(".git/refs/heads/master")).unwrap();
        assert_eq!(contents, format!("{}\n", "cd".repeat(20)));
    }

    #[test]
    fn test_detached_head() {
        let (_dir, store) = refs();
        let id = ObjectId::from_bytes([1; 20]);
        store.set("HEAD", id).unwrap();
        assert_eq!(store.current_branch(), None);
        assert_eq!(store.resolve_head().unwrap(), id);
    }

    #[test]
    fn test_missing_ref() {
        let (_dir, store) = refs();
        assert!(matches!(
            store.get("refs/heads/nope"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let (_dir, store) = refs();
        let id = ObjectId::from_bytes([1; 20]);
        assert!(store.set("refs/../../evil", id).is_err());
        assert!(store.set("config", id).is_err());
    }

    #[test]
    fn test_symref_loop() {
        let (_dir, store) = refs();
        store.set_symbolic("refs/heads/a", "refs/heads/b").unwrap();
        store.set_symbolic("refs/heads/b", "refs/heads/a").unwrap();
        assert!(matches!(
            store.resolve("refs/heads/a"),
            Err(StorageError::InvalidRef(_))
        ));
    }
}
