//! Object store interface.
//!
//! Defines the contract that every object store implements, so the
//! pack machinery can write into memory or onto disk alike.

use crate::{GitObject, ObjectId, ObjectType, Result};
use std::sync::Arc;

/// Content-addressed object storage.
///
/// Writes are idempotent: putting the same `(kind, payload)` twice
/// returns the same id and stores it once. Objects are never mutated
/// or deleted.
pub trait ObjectStore: Send + Sync {
    /// Stores an already-hashed object and returns its ID.
    fn put_object(&self, object: &GitObject) -> Result<ObjectId>;

    /// Retrieves an object by ID.
    ///
    /// Fails with `ObjectNotFound` if absent and `Corrupt` if the stored
    /// form cannot be decoded.
    fn get(&self, id: &ObjectId) -> Result<GitObject>;

    /// Checks if an object exists. Never has side effects.
    fn exists(&self, id: &ObjectId) -> bool;

    /// Returns the number of objects in the store.
    fn len(&self) -> Result<usize>;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Hashes and stores a payload of the given kind.
    fn put(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        self.put_object(&GitObject::new(kind, payload.to_vec()))
    }

    /// Batch put operation.
    fn batch_put(&self, objects: &[GitObject]) -> Result<Vec<ObjectId>> {
        objects.iter().map(|obj| self.put_object(obj)).collect()
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put_object(&self, object: &GitObject) -> Result<ObjectId> {
        (**self).put_object(object)
    }

    fn get(&self, id: &ObjectId) -> Result<GitObject> {
        (**self).get(id)
    }

    fn exists(&self, id: &ObjectId) -> bool {
        (**self).exists(id)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_put_hashes_payload() {
        let store = MemoryStore::new();
        let id = store.put(ObjectType::Blob, b"hello\n").unwrap();
        assert_eq!(id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_arc_forwards() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        assert!(store.is_empty().unwrap());
        let id = store.put(ObjectType::Tag, b"tag body").unwrap();
        assert!(store.exists(&id));
        assert_eq!(store.len().unwrap(), 1);
    }
}
