//! Log segments.
//!
//! A segment holds a contiguous run of up to 30000 entries in one mapped
//! file.
//!
//! ## Segment Format
//!
//! ```text
//! offset      size          field
//! 0           30000 * 32    slot table
//! 960000      8             magic "RWALSEG1"
//! 1048576     ...           payload frames, packed in index order
//! ```
//!
//! Each slot is `| term (8) | index (8) | payload offset (8) | type (8) |`
//! and each payload frame is `| len (4) | crc32 (4) | bytes |`. The payload
//! is written before its slot and the slot's index field is written last,
//! so a slot whose index reads zero was never completely written.

mod log_segment;
mod slot;

pub use log_segment::LogSegment;
pub use slot::{SegmentView, Slot};

/// Size of one slot.
pub const SLOT_SIZE: u64 = 32;

/// Number of slots in a segment.
pub const SLOTS_PER_SEGMENT: u64 = 30_000;

/// Offset of the segment magic, right after the slot table.
pub const SEGMENT_MAGIC_OFFSET: u64 = SLOTS_PER_SEGMENT * SLOT_SIZE;

/// Magic bytes identifying a segment file.
pub const SEGMENT_MAGIC: [u8; 8] = *b"RWALSEG1";

/// Size of the header region; payloads start here.
pub const HEADER_SIZE: u64 = 1 << 20;
