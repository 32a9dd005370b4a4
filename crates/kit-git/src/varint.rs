//! Variable-length integer encodings of the pack format.
//!
//! Three distinct schemes live here and must not be unified:
//!
//! - the object header: type in bits 4-6 of the first byte, size seeded
//!   from its low nibble, then 7 bits per continuation byte;
//! - the ofs-delta base distance: big-endian 7-bit groups where every
//!   continuation adds one before shifting;
//! - delta copy operands: a control byte whose bits select which of the
//!   following offset/length bytes are present.
//!
//! Sizes at the start of a delta payload use plain little-endian 7-bit
//! groups ([`read_size`]).

use crate::{GitError, Result};

const CONTINUE: u8 = 0x80;

/// A read cursor over an in-memory byte buffer.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Reads one byte, or `None` at end of input.
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Reads exactly `n` bytes, or `None` if fewer remain.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Moves the cursor forward by `n` bytes, clamped to the end.
    pub fn advance(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n).min(self.data.len());
    }
}

/// Decodes an object header, returning `(type code, size)`.
///
/// The type code is returned raw so the caller decides which codes
/// are acceptable.
pub fn read_object_header(cursor: &mut ByteCursor<'_>) -> Result<(u8, u64)> {
    let first = cursor
        .next_byte()
        .ok_or_else(|| GitError::MalformedVarInt("empty object header".to_string()))?;

    let kind = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0F);
    let mut shift = 4u32;
    let mut byte = first;

    while byte & CONTINUE != 0 {
        byte = cursor.next_byte().ok_or_else(|| {
            GitError::MalformedVarInt("object header ends mid-continuation".to_string())
        })?;
        let group = u64::from(byte & 0x7F);
        if shift > 63 || (group << shift) >> shift != group {
            return Err(GitError::MalformedVarInt(
                "object size overflows 64 bits".to_string(),
            ));
        }
        size |= group << shift;
        shift += 7;
    }

    Ok((kind, size))
}

/// Decodes a little-endian base-128 size (delta payload header).
pub fn read_size(cursor: &mut ByteCursor<'_>) -> Result<u64> {
    let mut size = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = cursor
            .next_byte()
            .ok_or_else(|| GitError::MalformedVarInt("size ends mid-continuation".to_string()))?;
        let group = u64::from(byte & 0x7F);
        if shift > 63 || (group << shift) >> shift != group {
            return Err(GitError::MalformedVarInt("size overflows 64 bits".to_string()));
        }
        size |= group << shift;
        if byte & CONTINUE == 0 {
            return Ok(size);
        }
        shift += 7;
    }
}

/// Decodes the backward distance of an ofs-delta base.
pub fn read_offset(cursor: &mut ByteCursor<'_>) -> Result<u64> {
    let mut byte = cursor
        .next_byte()
        .ok_or_else(|| GitError::MalformedVarInt("empty base offset".to_string()))?;
    let mut offset = u64::from(byte & 0x7F);

    while byte & CONTINUE != 0 {
        byte = cursor.next_byte().ok_or_else(|| {
            GitError::MalformedVarInt("base offset ends mid-continuation".to_string())
        })?;
        offset = offset
            .checked_add(1)
            .and_then(|o| o.checked_mul(1 << 7))
            .ok_or_else(|| GitError::MalformedVarInt("base offset overflows".to_string()))?
            | u64::from(byte & 0x7F);
    }

    Ok(offset)
}

/// Decodes the operands of a copy instruction selected by `control`.
///
/// Bits 0-3 select offset bytes, bits 4-6 select length bytes, least
/// significant byte first; absent bytes are zero. A decoded length of
/// zero means `0x10000`.
pub fn read_copy_operands(control: u8, cursor: &mut ByteCursor<'_>) -> Result<(u64, u32)> {
    let mut operand = |bits: std::ops::Range<u8>| -> Result<u64> {
        let mut value = 0u64;
        for (i, bit) in bits.enumerate() {
            if control & (1 << bit) != 0 {
                let byte = cursor.next_byte().ok_or_else(|| {
                    GitError::MalformedDeltaInstruction("copy operand truncated".to_string())
                })?;
                value |= u64::from(byte) << (8 * i);
            }
        }
        Ok(value)
    };

    let offset = operand(0..4)?;
    let length = match operand(4..7)? {
        0 => 0x10000,
        // At most three bytes were read, so this always fits.
        n => n as u32,
    };
    Ok((offset, length))
}

/// Encodes an object header.
pub fn encode_object_header(kind: u8, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    let mut byte = ((kind & 0x07) << 4) | (size & 0x0F) as u8;
    let mut rest = size >> 4;
    while rest != 0 {
        out.push(byte | CONTINUE);
        byte = (rest & 0x7F) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

/// Encodes a little-endian base-128 size.
pub fn encode_size(mut size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    loop {
        let byte = (size & 0x7F) as u8;
        size >>= 7;
        if size == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | CONTINUE);
    }
}

/// Encodes an ofs-delta base distance.
pub fn encode_offset(mut offset: u64) -> Vec<u8> {
    let mut out = vec![(offset & 0x7F) as u8];
    offset >>= 7;
    while offset != 0 {
        offset -= 1;
        out.push(CONTINUE | (offset & 0x7F) as u8);
        offset >>= 7;
    }
    out.reverse();
    out
}
