//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

use crate::stats::PackStats;
use crate::varint::{self, ByteCursor};
use crate::{GitError, Result};
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use kit_storage::{GitObject, ObjectId, ObjectType};
use sha1::{Digest, Sha1};
use std::io::Write;

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack versions we accept.
const PACK_VERSIONS: [u32; 2] = [2, 3];
/// Version written by [`PackBuilder`].
const PACK_VERSION: u32 = 2;
/// Header length: signature, version, object count.
const HEADER_LEN: usize = 12;
/// Trailer length: SHA-1 of everything before it.
const TRAILER_LEN: usize = 20;

const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

/// Upper bound on output preallocated from an untrusted declared size.
const MAX_PREALLOC: usize = 1 << 20;

/// Kind of a pack entry, including how a delta locates its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta against the entry `distance` bytes before this one.
    OfsDelta { distance: u64 },
    /// Delta against the object with this id.
    RefDelta { base: ObjectId },
}

impl EntryKind {
    /// Returns the object type for non-delta entries.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta { .. } | Self::RefDelta { .. } => None,
        }
    }

    /// Returns true for either delta kind.
    pub fn is_delta(&self) -> bool {
        self.object_type().is_none()
    }

    fn from_object_type(object_type: ObjectType) -> Self {
        match object_type {
            ObjectType::Commit => Self::Commit,
            ObjectType::Tree => Self::Tree,
            ObjectType::Blob => Self::Blob,
            ObjectType::Tag => Self::Tag,
        }
    }
}

/// One decoded pack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Stream position of the entry's first header byte.
    pub offset: u64,
    /// Entry kind and delta base locator.
    pub kind: EntryKind,
    /// Size from the entry header; equals `payload.len()`.
    pub declared_size: u64,
    /// Inflated payload: object body, or delta instructions.
    pub payload: Bytes,
}

impl PackEntry {
    /// Returns the ref-delta base id, if any.
    pub fn base_ref(&self) -> Option<ObjectId> {
        match self.kind {
            EntryKind::RefDelta { base } => Some(base),
            _ => None,
        }
    }

    /// Returns the stream position of an ofs-delta's base, if any.
    ///
    /// `None` also when the distance would point before the pack start.
    pub fn base_position(&self) -> Option<u64> {
        match self.kind {
            EntryKind::OfsDelta { distance } => self.offset.checked_sub(distance),
            _ => None,
        }
    }
}

/// A verified, fully decoded pack.
#[derive(Debug, Clone)]
pub struct Pack {
    /// Format version (2 or 3).
    pub version: u32,
    /// Object count from the header.
    pub object_count: u32,
    /// Entries in stream order.
    pub entries: Vec<PackEntry>,
    /// Trailing SHA-1 of the preceding bytes.
    pub trailer: ObjectId,
}

/// Parses a pack file into entries.
pub struct PackParser<'a> {
    data: &'a [u8],
    stats: Option<&'a PackStats>,
}

impl<'a> PackParser<'a> {
    /// Creates a new pack parser.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, stats: None }
    }

    /// Records parse counters into `stats`.
    pub fn with_stats(mut self, stats: &'a PackStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Verifies the checksum, then decodes every entry.
    ///
    /// No entry is decoded unless the trailer matches.
    pub fn parse(&self) -> Result<Pack> {
        if self.data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(GitError::InvalidPack(format!(
                "pack too small: {} bytes",
                self.data.len()
            )));
        }

        let body_end = self.data.len() - TRAILER_LEN;
        let trailer = ObjectId::from_slice(&self.data[body_end..])?;
        let computed: [u8; 20] = Sha1::digest(&self.data[..body_end]).into();
        if computed != *trailer.as_bytes() {
            tracing::warn!(expected = %trailer, "pack checksum mismatch");
            return Err(GitError::PackChecksumMismatch {
                expected: trailer.to_hex(),
                computed: hex::encode(computed),
            });
        }

        if &self.data[0..4] != PACK_SIGNATURE {
            return Err(GitError::InvalidPack("invalid signature".to_string()));
        }

        let version = u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        if !PACK_VERSIONS.contains(&version) {
            return Err(GitError::InvalidPack(format!(
                "unsupported version: {}",
                version
            )));
        }

        let object_count =
            u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]]);

        tracing::debug!(version, object_count, bytes = self.data.len(), "parsing pack");

        let body = &self.data[..body_end];
        let mut cursor = ByteCursor::new(body);
        cursor.advance(HEADER_LEN);

        // The count is untrusted; let the entries grow the vector.
        let mut entries = Vec::with_capacity((object_count as usize).min(4096));
        for _ in 0..object_count {
            let entry = self.parse_entry(&mut cursor)?;
            if let Some(stats) = self.stats {
                stats.record_entry(entry.payload.len() as u64, entry.kind.is_delta());
            }
            entries.push(entry);
        }

        if !cursor.is_empty() {
            return Err(GitError::InvalidPack(format!(
                "{} trailing bytes after {} entries",
                cursor.remaining().len(),
                object_count
            )));
        }

        Ok(Pack {
            version,
            object_count,
            entries,
            trailer,
        })
    }

    /// Parses a single entry at the cursor.
    fn parse_entry(&self, cursor: &mut ByteCursor<'_>) -> Result<PackEntry> {
        let offset = cursor.position() as u64;
        if cursor.is_empty() {
            return Err(GitError::InvalidPack(format!(
                "unexpected end of pack at offset {}",
                offset
            )));
        }

        let (code, declared_size) = varint::read_object_header(cursor)?;
        let kind = match code {
            OBJ_OFS_DELTA => {
                let distance = varint::read_offset(cursor)?;
                if distance > offset {
                    return Err(GitError::InvalidPack(format!(
                        "ofs-delta at {} points {} bytes back, before the pack start",
                        offset, distance
                    )));
                }
                EntryKind::OfsDelta { distance }
            }
            OBJ_REF_DELTA => {
                let base = cursor.take(ObjectId::LEN).ok_or_else(|| {
                    GitError::InvalidPack(format!("truncated ref-delta base at {}", offset))
                })?;
                EntryKind::RefDelta {
                    base: ObjectId::from_slice(base)?,
                }
            }
            code => EntryKind::from_object_type(
                ObjectType::from_pack_type(code)
                    .map_err(|_| GitError::InvalidPack(format!("unknown object type {} at {}", code, offset)))?,
            ),
        };

        let (payload, consumed) = inflate_exact(cursor.remaining(), declared_size, offset)?;
        cursor.advance(consumed);

        tracing::trace!(offset, kind = ?kind, size = declared_size, compressed = consumed, "pack entry");

        Ok(PackEntry {
            offset,
            kind,
            declared_size,
            payload: Bytes::from(payload),
        })
    }
}

/// Inflates one zlib stream from the front of `input`.
///
/// Returns the output and the exact number of compressed bytes the
/// stream occupied. Stops early once output exceeds `declared`.
fn inflate_exact(input: &[u8], declared: u64, offset: u64) -> Result<(Vec<u8>, usize)> {
    let mismatch = |actual: u64| GitError::SizeMismatch {
        offset,
        declared,
        actual,
    };

    let mut inflater = Decompress::new(true);
    let limit = usize::try_from(declared).map_err(|_| mismatch(0))?;
    let mut out = Vec::with_capacity(limit.saturating_add(1).min(MAX_PREALLOC));

    loop {
        if out.len() > limit {
            return Err(mismatch(out.len() as u64));
        }
        if out.len() == out.capacity() {
            out.reserve(out.capacity().clamp(64, MAX_PREALLOC));
        }

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let consumed = before_in as usize;
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| {
                GitError::InvalidPack(format!("corrupt deflate stream at {}: {}", offset, e))
            })?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled =
                    inflater.total_in() == before_in && inflater.total_out() == before_out;
                if stalled && out.len() < out.capacity() {
                    return Err(GitError::InvalidPack(format!(
                        "deflate stream at {} is truncated",
                        offset
                    )));
                }
            }
        }
    }

    if out.len() as u64 != declared {
        return Err(mismatch(out.len() as u64));
    }
    Ok((out, inflater.total_in() as usize))
}

/// A pending entry in a [`PackBuilder`].
enum BuilderEntry {
    Full(GitObject),
    OfsDelta { base_index: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Writes pack files from full objects and prepared delta payloads.
///
/// Deltas are never computed here; callers supply the instruction
/// stream (see [`crate::delta::Delta::to_bytes`]).
pub struct PackBuilder {
    entries: Vec<BuilderEntry>,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds an object to the pack and returns its entry index.
    pub fn add(&mut self, object: GitObject) -> usize {
        self.entries.push(BuilderEntry::Full(object));
        self.entries.len() - 1
    }

    /// Adds an ofs-delta against the entry at `base_index`.
    ///
    /// `base_index` may equal the new entry's own index, which yields a
    /// zero distance (a self-reference).
    pub fn add_ofs_delta(&mut self, base_index: usize, delta: Vec<u8>) -> usize {
        self.entries
            .push(BuilderEntry::OfsDelta { base_index, delta });
        self.entries.len() - 1
    }

    /// Adds a ref-delta against the object `base`.
    pub fn add_ref_delta(&mut self, base: ObjectId, delta: Vec<u8>) -> usize {
        self.entries.push(BuilderEntry::RefDelta { base, delta });
        self.entries.len() - 1
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();

        // Write header
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        let count = u32::try_from(self.entries.len())
            .map_err(|_| GitError::InvalidPack("too many objects".to_string()))?;
        pack.extend_from_slice(&count.to_be_bytes());

        let mut offsets = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            let offset = pack.len() as u64;
            offsets.push(offset);
            match entry {
                BuilderEntry::Full(object) => {
                    pack.extend(varint::encode_object_header(
                        object.object_type.pack_type(),
                        object.data.len() as u64,
                    ));
                    pack.extend(compress(&object.data)?);
                }
                BuilderEntry::OfsDelta { base_index, delta } => {
                    if *base_index > index {
                        return Err(GitError::InvalidPack(format!(
                            "ofs-delta {} cannot reference later entry {}",
                            index, base_index
                        )));
                    }
                    pack.extend(varint::encode_object_header(OBJ_OFS_DELTA, delta.len() as u64));
                    pack.extend(varint::encode_offset(offset - offsets[*base_index]));
                    pack.extend(compress(delta)?);
                }
                BuilderEntry::RefDelta { base, delta } => {
                    pack.extend(varint::encode_object_header(OBJ_REF_DELTA, delta.len() as u64));
                    pack.extend_from_slice(base.as_bytes());
                    pack.extend(compress(delta)?);
                }
            }
        }

        // Compute and append checksum
        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);

        Ok(pack)
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_blob_pack(content: &[u8]) -> Vec<u8> {
        let mut builder = PackBuilder::new();
        builder.add(GitObject::blob(content.to_vec()));
        builder.build().unwrap()
    }

    /// Recomputes the trailer after a test mutates the body.
    fn reseal(pack: &mut Vec<u8>) {
        let end = pack.len() - TRAILER_LEN;
        let checksum = Sha1::digest(&pack[..end]);
        pack[end..].copy_from_slice(&checksum);
    }

    #[test]
    fn test_pack_roundtrip() {
        let blob1 = GitObject::blob(b"Hello, World!".to_vec());
        let blob2 = GitObject::blob(b"Goodbye, World!".to_vec());

        let mut builder = PackBuilder::new();
        builder.add(blob1.clone());
        builder.add(blob2.clone());
        let data = builder.build().unwrap();

        let pack = PackParser::new(&data).parse().unwrap();
        assert_eq!(pack.version, 2);
        assert_eq!(pack.object_count, 2);
        assert_eq!(pack.entries.len(), 2);
        assert_eq!(pack.entries[0].kind, EntryKind::Blob);
        assert_eq!(pack.entries[0].offset, HEADER_LEN as u64);
        assert_eq!(pack.entries[0].payload, blob1.data);
        assert_eq!(pack.entries[1].payload, blob2.data);
        assert!(pack.entries[1].offset > pack.entries[0].offset);
    }

    #[test]
    fn test_pack_empty() {
        let data = PackBuilder::new().build().unwrap();
        assert_eq!(data.len(), HEADER_LEN + TRAILER_LEN);
        let pack = PackParser::new(&data).parse().unwrap();
        assert!(pack.entries.is_empty());
    }

    #[test]
    fn test_pack_all_object_types() {
        let objects = [
            GitObject::blob(b"blob content".to_vec()),
            GitObject::new(ObjectType::Tree, b"tree content".to_vec()),
            GitObject::new(ObjectType::Commit, b"commit content".to_vec()),
            GitObject::new(ObjectType::Tag, b"tag content".to_vec()),
        ];

        let mut builder = PackBuilder::new();
        for obj in &objects {
            builder.add(obj.clone());
        }
        let pack = PackParser::new(&builder.build().unwrap()).parse().unwrap();

        let kinds: Vec<_> = pack.entries.iter().map(|e| e.kind.object_type()).collect();
        assert_eq!(
            kinds,
            [
                Some(ObjectType::Blob),
                Some(ObjectType::Tree),
                Some(ObjectType::Commit),
                Some(ObjectType::Tag)
            ]
        );
    }

    #[test]
    fn test_pack_large_object() {
        let large_data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let pack = PackParser::new(&single_blob_pack(&large_data)).parse().unwrap();
        assert_eq!(pack.entries[0].payload.as_ref(), large_data.as_slice());
    }

    #[test]
    fn test_pack_delta_entries() {
        let base = GitObject::blob(b"base".to_vec());
        let mut builder = PackBuilder::new();
        let base_index = builder.add(base.clone());
        builder.add_ofs_delta(base_index, b"ofs".to_vec());
        builder.add_ref_delta(base.id, b"ref".to_vec());
        let pack = PackParser::new(&builder.build().unwrap()).parse().unwrap();

        let ofs = &pack.entries[1];
        assert!(ofs.kind.is_delta());
        assert_eq!(ofs.base_position(), Some(pack.entries[0].offset));
        assert_eq!(ofs.payload.as_ref(), b"ofs");
        assert_eq!(ofs.base_ref(), None);

        let refd = &pack.entries[2];
        assert_eq!(refd.base_ref(), Some(base.id));
        assert_eq!(refd.base_position(), None);
        assert_eq!(refd.declared_size, 3);
    }

    #[test]
    fn test_pack_invalid_signature() {
        let mut data = single_blob_pack(b"x");
        data[3] = b'X';
        reseal(&mut data);
        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_invalid_version() {
        let mut data = single_blob_pack(b"x");
        data[7] = 99;
        reseal(&mut data);
        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_too_small() {
        assert!(matches!(
            PackParser::new(&[0u8; 10]).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_checksum_mismatch_in_trailer() {
        let mut data = single_blob_pack(b"test");
        let len = data.len();
        data[len - 1] ^= 0xFF;
        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::PackChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_pack_any_body_byte_flip_fails_checksum() {
        let data = single_blob_pack(b"The quick brown fox jumps over the lazy dog");
        for i in 0..data.len() - TRAILER_LEN {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            let result = PackParser::new(&corrupted).parse();
            assert!(
                matches!(result, Err(GitError::PackChecksumMismatch { .. })),
                "byte {} flip gave {:?}",
                i,
                result
            );
        }
    }

    #[test]
    fn test_pack_count_larger_than_entries() {
        let mut data = single_blob_pack(b"only one");
        data[11] = 2;
        reseal(&mut data);
        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_trailing_garbage() {
        let mut data = single_blob_pack(b"one");
        let end = data.len() - TRAILER_LEN;
        data.insert(end, 0);
        reseal(&mut data);
        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_declared_size_mismatch() {
        let blob = GitObject::blob(b"twelve bytes".to_vec());
        let mut data = Vec::new();
        data.extend_from_slice(PACK_SIGNATURE);
        data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend(varint::encode_object_header(3, 5));
        data.extend(compress(&blob.data).unwrap());
        data.extend_from_slice(&[0u8; TRAILER_LEN]);
        reseal(&mut data);

        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::SizeMismatch { declared: 5, .. })
        ));
    }

    #[test]
    fn test_pack_stream_shorter_than_declared() {
        let mut data = Vec::new();
        data.extend_from_slice(PACK_SIGNATURE);
        data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend(varint::encode_object_header(3, 20));
        data.extend(compress(b"twelve bytes").unwrap());
        data.extend_from_slice(&[0u8; TRAILER_LEN]);
        reseal(&mut data);

        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::SizeMismatch {
                declared: 20,
                actual: 12,
                ..
            })
        ));
    }

    #[test]
    fn test_pack_ofs_before_start() {
        let mut data = Vec::new();
        data.extend_from_slice(PACK_SIGNATURE);
        data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend(varint::encode_object_header(OBJ_OFS_DELTA, 1));
        data.extend(varint::encode_offset(100));
        data.extend(compress(b"x").unwrap());
        data.extend_from_slice(&[0u8; TRAILER_LEN]);
        reseal(&mut data);

        assert!(matches!(
            PackParser::new(&data).parse(),
            Err(GitError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_stats_recorded() {
        let stats = PackStats::new();
        let mut builder = PackBuilder::new();
        let base = builder.add(GitObject::blob(b"abc".to_vec()));
        builder.add_ofs_delta(base, b"delta".to_vec());
        let data = builder.build().unwrap();
        PackParser::new(&data).with_stats(&stats).parse().unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.entries_parsed, 2);
        assert_eq!(snapshot.delta_entries, 1);
        assert_eq!(snapshot.bytes_inflated, 8);
    }

    #[test]
    fn test_builder_rejects_forward_ofs_delta() {
        let mut builder = PackBuilder::new();
        builder.add_ofs_delta(5, b"x".to_vec());
        assert!(builder.build().is_err());
    }
}
