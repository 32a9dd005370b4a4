//! Tree object body codec.
//!
//! A tree body is a flat run of `"<mode> <name>\0"` followed by the raw
//! 20-byte hash of the entry. Decoding preserves the order found on the
//! wire; [`sort_entries`] gives the canonical order for trees we write.

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use std::cmp::Ordering;

/// Mode of a subdirectory entry as serialized.
pub const MODE_TREE: &str = "40000";
/// Mode of a regular file.
pub const MODE_FILE: &str = "100644";
/// Mode of an executable file.
pub const MODE_EXECUTABLE: &str = "100755";
/// Mode of a symbolic link.
pub const MODE_SYMLINK: &str = "120000";

/// One `(mode, name, hash)` entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal mode exactly as serialized (e.g. `"100644"`, `"40000"`).
    pub mode: String,
    /// Entry name (a single path component).
    pub name: String,
    /// Hash of the blob or subtree.
    pub hash: ObjectId,
}

impl TreeEntry {
    /// Creates a new entry.
    pub fn new(mode: impl Into<String>, name: impl Into<String>, hash: ObjectId) -> Self {
        Self {
            mode: mode.into(),
            name: name.into(),
            hash,
        }
    }

    /// Returns true if this entry points at a subtree.
    pub fn is_tree(&self) -> bool {
        self.mode.trim_start_matches('0') == MODE_TREE
    }

    /// Returns the type of the object the entry points at.
    pub fn object_type(&self) -> ObjectType {
        if self.is_tree() {
            ObjectType::Tree
        } else if self.mode == "160000" {
            ObjectType::Commit
        } else {
            ObjectType::Blob
        }
    }

    /// Returns the mode zero-padded to six digits, as listings show it.
    ///
    /// Only for display; serialization always uses [`TreeEntry::mode`].
    pub fn display_mode(&self) -> String {
        format!("{:0>6}", self.mode)
    }
}

/// Serializes entries in the given order.
pub fn encode(entries: &[TreeEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.iter().map(|e| e.mode.len() + e.name.len() + 22).sum());
    for entry in entries {
        out.extend_from_slice(entry.mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.hash.as_bytes());
    }
    out
}

/// Parses a tree body into its entries, in serialized order.
pub fn decode(payload: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        let start = pos;
        let rest = &payload[pos..];

        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(StorageError::TruncatedTree { offset: start })?;
        let mode = utf8(&rest[..space], start)?;

        let rest = &rest[space + 1..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(StorageError::TruncatedTree { offset: start })?;
        let name = utf8(&rest[..nul], start)?;

        let rest = &rest[nul + 1..];
        if rest.len() < ObjectId::LEN {
            return Err(StorageError::TruncatedTree { offset: start });
        }
        let hash = ObjectId::from_slice(&rest[..ObjectId::LEN])?;

        pos = start + space + 1 + nul + 1 + ObjectId::LEN;
        entries.push(TreeEntry { mode, name, hash });
    }

    Ok(entries)
}

fn utf8(bytes: &[u8], offset: usize) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        StorageError::InvalidObject(format!("tree entry at byte {} is not utf-8", offset))
    })
}

/// Sorts entries into git's canonical order.
///
/// Names compare bytewise, with subtrees compared as if their name
/// carried a trailing `/`.
pub fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by(canonical_cmp);
}

fn canonical_cmp(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let key = |e: &TreeEntry| {
        let mut k = e.name.as_bytes().to_vec();
        if e.is_tree() {
            k.push(b'/');
        }
        k
    };
    key(a).cmp(&key(b))
}

/// Builds a tree object from entries, sorting them canonically first.
pub fn build(mut entries: Vec<TreeEntry>) -> GitObject {
    sort_entries(&mut entries);
    GitObject::new(ObjectType::Tree, encode(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn test_encode_layout() {
        let entries = vec![TreeEntry::new(MODE_FILE, "a.txt", id(0xaa))];
        let encoded = encode(&entries);

        assert!(encoded.starts_with(b"100644 a.txt\0"));
        assert_eq!(encoded.len(), "100644 a.txt\0".len() + 20);
        assert_eq!(&encoded[encoded.len() - 20..], &[0xaa; 20]);
    }

    #[test]
    fn test_decode_preserves_order() {
        let entries = vec![
            TreeEntry::new(MODE_FILE, "zeta", id(1)),
            TreeEntry::new(MODE_TREE, "alpha", id(2)),
            TreeEntry::new(MODE_EXECUTABLE, "run.sh", id(3)),
        ];
        let decoded = decode(&encode(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_decode_truncated_hash() {
        let mut encoded = encode(&[TreeEntry::new(MODE_FILE, "f", id(9))]);
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(
            decode(&encoded),
            Err(StorageError::TruncatedTree { offset: 0 })
        ));
    }

    #[test]
    fn test_decode_truncated_second_entry() {
        let mut encoded = encode(&[
            TreeEntry::new(MODE_FILE, "a", id(1)),
            TreeEntry::new(MODE_FILE, "b", id(2)),
        ]);
        let first_len = "100644 a\0".len() + 20;
        encoded.truncate(first_len + 12);
        assert!(matches!(
            decode(&encoded),
            Err(StorageError::TruncatedTree { offset }) if offset == first_len
        ));
    }

    #[test]
    fn test_decode_hash_may_contain_separators() {
        // Raw hash bytes include ' ' and '\0'; the decoder must not scan them.
        let mut raw = [0u8; 20];
        raw[0] = b' ';
        raw[5] = 0;
        let entries = vec![
            TreeEntry::new(MODE_FILE, "x", ObjectId::from_bytes(raw)),
            TreeEntry::new(MODE_FILE, "y", id(4)),
        ];
        assert_eq!(decode(&encode(&entries)).unwrap(), entries);
    }

    #[test]
    fn test_canonical_sort_treats_dirs_with_slash() {
        // "foo.txt" < "foo/" because '.' (0x2e) < '/' (0x2f).
        let mut entries = vec![
            TreeEntry::new(MODE_TREE, "foo", id(1)),
            TreeEntry::new(MODE_FILE, "foo.txt", id(2)),
            TreeEntry::new(MODE_FILE, "bar", id(3)),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["bar", "foo.txt", "foo"]);
    }

    #[test]
    fn test_display_mode_pads_tree() {
        let tree = TreeEntry::new(MODE_TREE, "src", id(1));
        assert!(tree.is_tree());
        assert_eq!(tree.object_type(), ObjectType::Tree);
        assert_eq!(tree.display_mode(), "040000");
        assert_eq!(tree.mode, "40000");

        let file = TreeEntry::new(MODE_FILE, "f", id(1));
        assert_eq!(file.display_mode(), "100644");
        assert_eq!(file.object_type(), ObjectType::Blob);
    }

    #[test]
    fn test_build_hash_independent_of_input_order() {
        let a = TreeEntry::new(MODE_FILE, "a", id(1));
        let b = TreeEntry::new(MODE_FILE, "b", id(2));
        let t1 = build(vec![a.clone(), b.clone()]);
        let t2 = build(vec![b, a]);
        assert_eq!(t1.id, t2.id);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn entry() -> impl Strategy<Value = TreeEntry> {
        (
            prop_oneof![
                Just(MODE_FILE),
                Just(MODE_EXECUTABLE),
                Just(MODE_TREE),
                Just(MODE_SYMLINK)
            ],
            "[a-zA-Z0-9._-]{1,24}",
            any::<[u8; 20]>(),
        )
            .prop_map(|(mode, name, hash)| TreeEntry::new(mode, name, ObjectId::from_bytes(hash)))
    }

    proptest! {
        /// Property: decode(encode(entries)) == entries
        #[test]
        fn prop_tree_roundtrip(entries in prop::collection::vec(entry(), 1..32)) {
            let decoded = decode(&encode(&entries)).unwrap();
            prop_assert_eq!(decoded, entries);
        }

        /// Property: arbitrary bytes never panic the decoder
        #[test]
        fn prop_decode_no_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(&data);
        }
    }
}
