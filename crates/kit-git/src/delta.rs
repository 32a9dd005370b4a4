//! Delta application and pack-wide delta resolution.
//!
//! A delta payload is two sizes (base, result) followed by copy and
//! insert instructions. [`DeltaResolver`] turns every entry of a
//! [`Pack`] into a full object, following ofs and ref bases through
//! chains of any depth.

use crate::pack::{EntryKind, Pack, PackEntry};
use crate::stats::PackStats;
use crate::varint::{self, ByteCursor};
use crate::{GitError, Result};
use bytes::Bytes;
use kit_storage::{GitObject, ObjectId, ObjectStore};
use std::collections::{HashMap, HashSet};

/// Largest insert a single control byte can carry.
const MAX_INSERT: usize = 0x7F;
/// Largest copy length expressible with three length bytes.
const MAX_COPY: u32 = 0xFF_FFFF;
/// Upper bound on output preallocated from an untrusted result size.
const MAX_PREALLOC: u64 = 1 << 20;

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy `length` bytes of the base starting at `offset`.
    Copy { offset: u64, length: u32 },
    /// Append literal bytes.
    Insert(Vec<u8>),
}

impl DeltaInstruction {
    /// Decodes instructions until the cursor is exhausted.
    pub fn parse_all(cursor: &mut ByteCursor<'_>) -> Result<Vec<Self>> {
        let mut instructions = Vec::new();
        while let Some(control) = cursor.next_byte() {
            let instruction = if control & 0x80 != 0 {
                let (offset, length) = varint::read_copy_operands(control, cursor)?;
                Self::Copy { offset, length }
            } else if control == 0 {
                return Err(GitError::MalformedDeltaInstruction(format!(
                    "reserved control byte 0x00 at {}",
                    cursor.position() - 1
                )));
            } else {
                let literal = cursor.take(usize::from(control)).ok_or_else(|| {
                    GitError::MalformedDeltaInstruction(format!(
                        "insert of {} bytes runs past end of delta",
                        control
                    ))
                })?;
                Self::Insert(literal.to_vec())
            };
            instructions.push(instruction);
        }
        Ok(instructions)
    }

    /// Appends this instruction's output to `out`.
    pub fn apply(&self, base: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Copy { offset, length } => {
                let range = usize::try_from(*offset)
                    .ok()
                    .and_then(|start| Some(start..start.checked_add(*length as usize)?))
                    .filter(|range| range.end <= base.len())
                    .ok_or_else(|| {
                        GitError::MalformedDeltaInstruction(format!(
                            "copy {}+{} outside base of {} bytes",
                            offset,
                            length,
                            base.len()
                        ))
                    })?;
                out.extend_from_slice(&base[range]);
            }
            Self::Insert(literal) => out.extend_from_slice(literal),
        }
        Ok(())
    }

    fn output_len(&self) -> u64 {
        match self {
            Self::Copy { length, .. } => u64::from(*length),
            Self::Insert(literal) => literal.len() as u64,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Copy { offset, length } => {
                let mut start = *offset;
                let mut left = *length;
                while left > 0 {
                    let chunk = left.min(MAX_COPY);
                    encode_copy(start, chunk, out);
                    start += u64::from(chunk);
                    left -= chunk;
                }
            }
            Self::Insert(literal) => {
                for chunk in literal.chunks(MAX_INSERT) {
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk);
                }
            }
        }
    }
}

fn encode_copy(offset: u64, length: u32, out: &mut Vec<u8>) {
    let control_at = out.len();
    out.push(0x80);
    for i in 0..4 {
        let byte = (offset >> (8 * i)) as u8;
        if byte != 0 {
            out[control_at] |= 1 << i;
            out.push(byte);
        }
    }
    // A length with no bytes present decodes as 0x10000.
    if length != 0x10000 {
        for i in 0..3 {
            let byte = (length >> (8 * i)) as u8;
            if byte != 0 {
                out[control_at] |= 1 << (4 + i);
                out.push(byte);
            }
        }
    }
}

/// A decoded delta payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Length the base object must have.
    pub base_size: u64,
    /// Length of the reconstructed object.
    pub result_size: u64,
    /// Instructions in application order.
    pub instructions: Vec<DeltaInstruction>,
}

impl Delta {
    /// Decodes a delta payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        let base_size = varint::read_size(&mut cursor)?;
        let result_size = varint::read_size(&mut cursor)?;
        let instructions = DeltaInstruction::parse_all(&mut cursor)?;
        Ok(Self {
            base_size,
            result_size,
            instructions,
        })
    }

    /// Applies the instructions to `base`.
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>> {
        if base.len() as u64 != self.base_size {
            return Err(GitError::DeltaSizeMismatch {
                what: "base",
                expected: self.base_size,
                actual: base.len() as u64,
            });
        }

        let mut out = Vec::with_capacity(self.result_size.min(MAX_PREALLOC) as usize);
        for instruction in &self.instructions {
            // Reject before producing more than was declared.
            let produced = out.len() as u64 + instruction.output_len();
            if produced > self.result_size {
                return Err(GitError::DeltaSizeMismatch {
                    what: "result",
                    expected: self.result_size,
                    actual: produced,
                });
            }
            instruction.apply(base, &mut out)?;
        }

        if out.len() as u64 != self.result_size {
            return Err(GitError::DeltaSizeMismatch {
                what: "result",
                expected: self.result_size,
                actual: out.len() as u64,
            });
        }
        Ok(out)
    }

    /// Serializes the delta into pack payload form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = varint::encode_size(self.base_size);
        out.extend(varint::encode_size(self.result_size));
        for instruction in &self.instructions {
            instruction.encode(&mut out);
        }
        out
    }
}

/// Applies a raw delta payload to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    Delta::parse(delta)?.apply(base)
}

/// Reconstructs one entry from its immediate base.
///
/// `lookup` finds a ref-delta base by id; `offset_lookup` receives the
/// entry's stream position and backward distance. Non-delta entries are
/// returned as-is.
pub fn resolve<L, O>(entry: &PackEntry, mut lookup: L, mut offset_lookup: O) -> Result<Vec<u8>>
where
    L: FnMut(&ObjectId) -> Option<Bytes>,
    O: FnMut(u64, u64) -> Option<Bytes>,
{
    let base = match entry.kind {
        EntryKind::RefDelta { base } => lookup(&base).ok_or_else(|| GitError::missing_ref_base(&base))?,
        EntryKind::OfsDelta { distance } => {
            offset_lookup(entry.offset, distance).ok_or_else(|| {
                GitError::MissingBase(format!(
                    "offset {} - {}",
                    entry.offset, distance
                ))
            })?
        }
        _ => return Ok(entry.payload.to_vec()),
    };
    apply_delta(&base, &entry.payload)
}

/// Where the bottom of a delta chain was found.
enum ChainBase {
    /// An already-resolved pack entry.
    Entry(usize),
    /// An object from the local store.
    Store(GitObject),
}

/// Resolves every entry in a pack into a full object.
///
/// Ref-delta bases are searched among resolved pack entries first, then
/// in the local store. Results are memoised per entry index so shared
/// bases are reconstructed once.
pub struct DeltaResolver<'a> {
    pack: &'a Pack,
    store: &'a dyn ObjectStore,
    stats: Option<&'a PackStats>,
    by_offset: HashMap<u64, usize>,
    by_id: HashMap<ObjectId, usize>,
    resolved: Vec<Option<GitObject>>,
    depth: Vec<u64>,
}

impl<'a> DeltaResolver<'a> {
    /// Creates a resolver over `pack`, using `store` for external bases.
    pub fn new(pack: &'a Pack, store: &'a dyn ObjectStore) -> Self {
        let by_offset = pack
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.offset, i))
            .collect();
        Self {
            pack,
            store,
            stats: None,
            by_offset,
            by_id: HashMap::new(),
            resolved: vec![None; pack.entries.len()],
            depth: vec![0; pack.entries.len()],
        }
    }

    /// Records resolution counters into `stats`.
    pub fn with_stats(mut self, stats: &'a PackStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Resolves all entries, returning objects in pack order.
    pub fn resolve_all(mut self) -> Result<Vec<GitObject>> {
        let mut pending = Vec::new();
        for (index, entry) in self.pack.entries.iter().enumerate() {
            match entry.kind.object_type() {
                Some(object_type) => {
                    let object = GitObject::new(object_type, entry.payload.clone());
                    self.by_id.insert(object.id, index);
                    self.resolved[index] = Some(object);
                }
                None => pending.push(index),
            }
        }

        // A ref-delta may name an object produced by a later entry, so
        // keep sweeping until a pass makes no progress.
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for index in pending {
                if !self.resolve_chain(index)? {
                    waiting.push(index);
                }
            }
            if waiting.len() == before {
                let stuck = &self.pack.entries[waiting[0]];
                tracing::warn!(offset = stuck.offset, unresolved = waiting.len(), "unresolvable delta bases");
                return Err(match stuck.base_ref() {
                    Some(base) => GitError::missing_ref_base(&base),
                    None => GitError::MissingBase(format!("entry at offset {}", stuck.offset)),
                });
            }
            pending = waiting;
        }

        let objects: Vec<GitObject> = self.resolved.into_iter().flatten().collect();
        tracing::debug!(objects = objects.len(), "resolved pack");
        Ok(objects)
    }

    /// Resolves `index` and every unresolved delta beneath it.
    ///
    /// Returns `false` when the chain bottoms out in a ref-delta whose
    /// base is not available yet.
    fn resolve_chain(&mut self, index: usize) -> Result<bool> {
        let pack = self.pack;
        let mut chain = Vec::new();
        let mut visiting = HashSet::new();
        let mut current = index;

        let base = loop {
            if self.resolved[current].is_some() {
                break ChainBase::Entry(current);
            }
            let entry = &pack.entries[current];
            if !visiting.insert(current) {
                return Err(GitError::DeltaCycleDetected(entry.offset));
            }
            chain.push(current);

            match entry.kind {
                EntryKind::OfsDelta { .. } => {
                    current = entry
                        .base_position()
                        .and_then(|position| self.by_offset.get(&position).copied())
                        .ok_or_else(|| {
                            GitError::MissingBase(format!(
                                "no entry starts at ofs-delta base of entry at {}",
                                entry.offset
                            ))
                        })?;
                }
                EntryKind::RefDelta { base } => {
                    if let Some(&found) = self.by_id.get(&base) {
                        current = found;
                    } else if self.store.exists(&base) {
                        break ChainBase::Store(self.store.get(&base)?);
                    } else {
                        return Ok(false);
                    }
                }
                // Full entries are resolved before any chain is walked.
                _ => {
                    return Err(GitError::InvalidPack(format!(
                        "entry at {} has no resolved object",
                        entry.offset
                    )))
                }
            }
        };

        let (mut base_object, mut base_depth) = match base {
            ChainBase::Entry(i) => match &self.resolved[i] {
                Some(object) => (object.clone(), self.depth[i]),
                None => return Ok(false),
            },
            ChainBase::Store(object) => (object, 0),
        };

        for &link in chain.iter().rev() {
            let entry = &pack.entries[link];
            let data = resolve(
                entry,
                |id| (*id == base_object.id).then(|| base_object.data.clone()),
                |_, _| Some(base_object.data.clone()),
            )?;
            let object = GitObject::new(base_object.object_type, data);
            let depth = base_depth + 1;

            tracing::trace!(offset = entry.offset, id = %object.id, depth, "resolved delta");
            if let Some(stats) = self.stats {
                stats.record_delta(depth);
            }

            self.by_id.insert(object.id, link);
            self.depth[link] = depth;
            self.resolved[link] = Some(object.clone());
            base_object = object;
            base_depth = depth;
        }
        Ok(true)
    }
}

/// Resolves every entry of `pack`, returning full objects in pack order.
pub fn resolve_pack(pack: &Pack, store: &dyn ObjectStore) -> Result<Vec<GitObject>> {
    DeltaResolver::new(pack, store).resolve_all()
}
