//! Counters collected while unpacking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pack processing statistics.
#[derive(Debug, Default)]
pub struct PackStats {
    entries_parsed: AtomicU64,
    delta_entries: AtomicU64,
    bytes_inflated: AtomicU64,
    deltas_resolved: AtomicU64,
    max_chain_depth: AtomicU64,
    objects_written: AtomicU64,
}

impl PackStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one decoded entry.
    pub fn record_entry(&self, inflated: u64, is_delta: bool) {
        self.entries_parsed.fetch_add(1, Ordering::Relaxed);
        self.bytes_inflated.fetch_add(inflated, Ordering::Relaxed);
        if is_delta {
            self.delta_entries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one applied delta whose chain had `depth` links.
    pub fn record_delta(&self, depth: u64) {
        self.deltas_resolved.fetch_add(1, Ordering::Relaxed);
        self.max_chain_depth.fetch_max(depth, Ordering::Relaxed);
    }

    /// Records objects persisted to the store.
    pub fn record_written(&self, count: u64) {
        self.objects_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> PackStatsSnapshot {
        PackStatsSnapshot {
            entries_parsed: self.entries_parsed.load(Ordering::Relaxed),
            delta_entries: self.delta_entries.load(Ordering::Relaxed),
            bytes_inflated: self.bytes_inflated.load(Ordering::Relaxed),
            deltas_resolved: self.deltas_resolved.load(Ordering::Relaxed),
            max_chain_depth: self.max_chain_depth.load(Ordering::Relaxed),
            objects_written: self.objects_written.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`PackStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PackStatsSnapshot {
    pub entries_parsed: u64,
    pub delta_entries: u64,
    pub bytes_inflated: u64,
    pub deltas_resolved: u64,
    pub max_chain_depth: u64,
    pub objects_written: u64,
}
