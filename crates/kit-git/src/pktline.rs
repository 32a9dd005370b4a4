//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for ref advertisement and negotiation.
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself, or "0000" for flush.

use crate::{GitError, Result};

/// Largest total packet length allowed on the wire.
pub const MAX_PKT_LEN: usize = 65520;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data(data) => encode(data),
            Self::Flush => b"0000".to_vec(),
        }
    }
}

/// Prepends the 4-hex-digit total length to `payload`.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut result = format!("{:04x}", payload.len() + 4).into_bytes();
    result.extend_from_slice(payload);
    result
}

/// Parses a length prefix into the payload length that follows it, or
/// `None` for a flush packet.
fn parse_prefix(prefix: &[u8; 4]) -> Result<Option<usize>> {
    if !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(GitError::InvalidPktLine(format!(
            "length prefix is not hex: {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    // Four hex digits always fit in a u16.
    let len = prefix
        .iter()
        .fold(0usize, |acc, &b| (acc << 4) | hex_value(b) as usize);

    match len {
        0 => Ok(None),
        1..=3 => Err(GitError::InvalidPktLine(format!(
            "length {} is shorter than its own prefix",
            len
        ))),
        n if n > MAX_PKT_LEN => Err(GitError::InvalidPktLine(format!(
            "length {} exceeds maximum {}",
            n, MAX_PKT_LEN
        ))),
        n => Ok(Some(n - 4)),
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Lazily decodes packets from an in-memory buffer.
///
/// Yields until the buffer is exhausted; after an error it yields
/// nothing further.
pub fn decode(buf: &[u8]) -> PktLineIter<'_> {
    PktLineIter {
        buf,
        pos: 0,
        failed: false,
    }
}

/// Iterator returned by [`decode`].
#[derive(Debug, Clone)]
pub struct PktLineIter<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> PktLineIter<'a> {
    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn read_one(&mut self) -> Result<PktLine> {
        let rest = self.remaining();
        let prefix: &[u8; 4] = rest
            .get(..4)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| GitError::InvalidPktLine("truncated length prefix".to_string()))?;

        let Some(len) = parse_prefix(prefix)? else {
            self.pos += 4;
            return Ok(PktLine::Flush);
        };
        let data = rest.get(4..4 + len).ok_or_else(|| {
            GitError::InvalidPktLine(format!(
                "declared {} payload bytes, {} available",
                len,
                rest.len() - 4
            ))
        })?;
        self.pos += 4 + len;
        Ok(PktLine::Data(data.to_vec()))
    }
}

impl Iterator for PktLineIter<'_> {
    type Item = Result<PktLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let item = self.read_one();
        self.failed = item.is_err();
        Some(item)
    }
}
