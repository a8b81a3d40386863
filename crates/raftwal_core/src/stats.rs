//! Log statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use raftwal_core::DurableLog;
//!
//! let log = DurableLog::open(path)?;
//! log.save(&hs, &entries, &Snapshot::default())?;
//!
//! let stats = log.stats()?;
//! println!("Entries: {}..={}", stats.first_index, stats.last_index);
//! println!("Appended: {}", stats.counters.entries_appended);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of an open log.
///
/// All counters are atomic and only ever increase.
#[derive(Debug, Default)]
pub struct WalCounters {
    /// Number of `save` calls.
    saves: AtomicU64,
    /// Number of entries appended.
    entries_appended: AtomicU64,
    /// Payload bytes appended.
    bytes_appended: AtomicU64,
    /// Number of entries read.
    entries_read: AtomicU64,
    /// Payload bytes read.
    bytes_read: AtomicU64,
    /// Number of syncs.
    syncs: AtomicU64,
    /// Number of snapshots taken locally.
    snapshots_created: AtomicU64,
    /// Number of snapshots installed from a leader.
    snapshots_applied: AtomicU64,
    /// Number of segments removed by compaction.
    segments_compacted: AtomicU64,
}

impl WalCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_append(&self, entries: u64, bytes: u64) {
        self.entries_appended.fetch_add(entries, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, entries: u64, bytes: u64) {
        self.entries_read.fetch_add(entries, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_created(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, segments: u64) {
        self.segments_compacted.fetch_add(segments, Ordering::Relaxed);
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            saves: self.saves.load(Ordering::Relaxed),
            entries_appended: self.entries_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            snapshots_created: self.snapshots_created.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            segments_compacted: self.segments_compacted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`WalCounters`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CountersSnapshot {
    /// Number of `save` calls.
    pub saves: u64,
    /// Number of entries appended.
    pub entries_appended: u64,
    /// Payload bytes appended.
    pub bytes_appended: u64,
    /// Number of entries read.
    pub entries_read: u64,
    /// Payload bytes read.
    pub bytes_read: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of snapshots taken locally.
    pub snapshots_created: u64,
    /// Number of snapshots installed from a leader.
    pub snapshots_applied: u64,
    /// Number of segments removed by compaction.
    pub segments_compacted: u64,
}

/// Shape of the log on disk plus its counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LogStats {
    /// First available index.
    pub first_index: u64,
    /// Last stored index.
    pub last_index: u64,
    /// Index of the stored snapshot, 0 if none.
    pub snapshot_index: u64,
    /// Term of the stored snapshot, 0 if none.
    pub snapshot_term: u64,
    /// Number of segment files.
    pub segment_count: usize,
    /// Total size of the segment files.
    pub segment_bytes: u64,
    /// Payload bytes stored in segments.
    pub payload_bytes: u64,
    /// Size of the meta file.
    pub meta_bytes: u64,
    /// Operation counters since open.
    pub counters: CountersSnapshot,
}

/// Description of one segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Segment id, as in the file name.
    pub id: u64,
    /// First stored index, `None` when empty.
    pub first_index: Option<u64>,
    /// Last stored index, `None` when empty.
    pub last_index: Option<u64>,
    /// Number of written slots.
    pub slots_used: u64,
    /// Size of the file.
    pub file_bytes: u64,
}
