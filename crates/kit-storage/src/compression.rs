//! Loose-object compression.
//!
//! Loose objects are stored as the zlib stream of
//! `"<type> <decimal-length>\0<payload>"`. This module owns that
//! encoding plus configurable levels and statistics.

use crate::{GitObject, ObjectType, Result, StorageError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compresses an object into its loose on-disk form.
pub fn deflate_object(object: &GitObject, level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder.write_all(&object.object_type.header(object.data.len()))?;
    encoder.write_all(&object.data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a loose object and validates its header.
pub fn inflate_object(compressed: &[u8]) -> Result<GitObject> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| StorageError::Corrupt(format!("decompression failed: {}", e)))?;

    // Parse header: "type size\0data"
    let null_pos = decompressed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::Corrupt("missing null byte in header".to_string()))?;

    let header = std::str::from_utf8(&decompressed[..null_pos])
        .map_err(|_| StorageError::Corrupt("header is not utf-8".to_string()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::Corrupt(format!("invalid header: {}", header)))?;

    let object_type =
        ObjectType::parse(kind).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("invalid size in header: {}", header)))?;

    let data = decompressed.split_off(null_pos + 1);
    if data.len() != size {
        return Err(StorageError::Corrupt(format!(
            "header declares {} bytes, payload has {}",
            size,
            data.len()
        )));
    }

    Ok(GitObject::new(object_type, data))
}

/// Compression statistics for monitoring.
#[derive(Debug, Default)]
pub struct CompressionStats {
    /// Total bytes before compression.
    pub input_bytes: AtomicU64,
    /// Total bytes after compression.
    pub output_bytes: AtomicU64,
    /// Number of compression operations.
    pub compress_count: AtomicU64,
    /// Number of decompression operations.
    pub decompress_count: AtomicU64,
}

impl CompressionStats {
    /// Creates new compression stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compression operation.
    pub fn record_compress(&self, input_size: u64, output_size: u64) {
        self.input_bytes.fetch_add(input_size, Ordering::Relaxed);
        self.output_bytes.fetch_add(output_size, Ordering::Relaxed);
        self.compress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decompression operation.
    pub fn record_decompress(&self) {
        self.decompress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the stats.
    pub fn snapshot(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            compress_count: self.compress_count.load(Ordering::Relaxed),
            decompress_count: self.decompress_count.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of compression statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionStatsSnapshot {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub compress_count: u64,
    pub decompress_count: u64,
}

impl CompressionStatsSnapshot {
    /// Returns the compression ratio (output/input).
    pub fn compression_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}
