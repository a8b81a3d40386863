//! # raftwal Core
//!
//! Crash-consistent Raft log and metadata store for raftwal.
//!
//! This crate provides:
//! - A fixed-layout meta file for node ids, hard state and snapshot
//! - Memory-mapped log segments of fixed slots plus payloads
//! - Segment rotation, tail overwrite and compaction
//! - [`DurableLog`], the storage a Raft engine saves into and reads from
//!
//! ## Data directory
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK
//! ├─ wal.meta
//! ├─ 00001.wal
//! └─ 00002.wal
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod dir;
mod durable;
mod error;
mod log_set;
mod meta;
mod segment;
mod stats;
mod storage;
mod types;

pub use codec::{EntryKey, FrameHeader, FRAME_HEADER_SIZE};
pub use config::Config;
pub use dir::{list_segment_files, meta_file_path, parse_segment_file_name, segment_file_name, DataDir};
pub use durable::DurableLog;
pub use error::{WalError, WalResult};
pub use log_set::LogSet;
pub use meta::{read_meta, MetaContents, MetaField, MetaStore, META_MAGIC, META_MIN_SIZE, META_VERSION};
pub use segment::{
    LogSegment, SegmentView, Slot, HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_MAGIC_OFFSET,
    SLOTS_PER_SEGMENT, SLOT_SIZE,
};
pub use stats::{CountersSnapshot, LogStats, SegmentInfo, WalCounters};
pub use storage::RaftStorage;
pub use types::{ConfState, Entry, EntryType, HardState, RaftState, Snapshot, SnapshotMetadata};

/// Crate version, as reported by tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
