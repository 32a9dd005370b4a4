//! In-memory object store.

use crate::{GitObject, ObjectId, ObjectStore, Result, StorageError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Content-addressed object store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Objects indexed by their SHA-1 hash.
    objects: RwLock<HashMap<ObjectId, GitObject>>,
}

impl MemoryStore {
    /// Creates a new empty object store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn put_object(&self, object: &GitObject) -> Result<ObjectId> {
        let id = object.id;
        self.objects
            .write()
            .entry(id)
            .or_insert_with(|| object.clone());
        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Result<GitObject> {
        self.objects
            .read()
            .get(id)
            .cloned()
            .ok_or(StorageError::ObjectNotFound(*id))
    }

    fn exists(&self, id: &ObjectId) -> bool {
        self.objects.read().contains_key(id)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.objects.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectType;
    use std::sync::Arc;

    #[test]
    fn test_object_store_roundtrip() {
        let store = MemoryStore::new();
        let id = store.put(ObjectType::Blob, b"Hello, World!").unwrap();

        let retrieved = store.get(&id).unwrap();
        assert_eq!(retrieved.object_type, ObjectType::Blob);
        assert_eq!(retrieved.data.as_ref(), b"Hello, World!");
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.put(ObjectType::Commit, b"same").unwrap();
        let b = store.put(ObjectType::Commit, b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_same_payload_different_kind() {
        let store = MemoryStore::new();
        let blob = store.put(ObjectType::Blob, b"x").unwrap();
        let tag = store.put(ObjectType::Tag, b"x").unwrap();
        assert_ne!(blob, tag);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_get_missing() {
        let store = MemoryStore::new();
        let id = ObjectId::from_bytes([3u8; 20]);
        assert!(!store.exists(&id));
        assert!(matches!(store.get(&id), Err(StorageError::ObjectNotFound(missing)) if missing == id));
    }

    #[test]
    fn test_concurrent_identical_puts() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.put(ObjectType::Blob, b"shared").unwrap())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.len().unwrap(), 1);
    }
}
