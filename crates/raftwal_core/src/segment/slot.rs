//! Slot records and read access to raw segment bytes.

use super::{HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_MAGIC_OFFSET, SLOTS_PER_SEGMENT, SLOT_SIZE};
use crate::codec::{EntryKey, FrameHeader, FRAME_HEADER_SIZE};
use crate::error::{WalError, WalResult};
use crate::types::{Entry, EntryType};

const TERM_OFFSET: u64 = 0;
const INDEX_OFFSET: u64 = 8;
const PAYLOAD_OFFSET: u64 = 16;
const TYPE_OFFSET: u64 = 24;

/// One written slot.
///
/// ```text
/// | term (8) | index (8) | payload offset (8) | entry type (8) |
/// ```
///
/// On disk an index of zero marks a slot that was never written; such a
/// slot is read back as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Term of the entry.
    pub term: u64,
    /// Index of the entry, never zero.
    pub index: u64,
    /// Absolute file offset of the payload frame.
    pub offset: u64,
    /// Kind of entry.
    pub entry_type: EntryType,
}

impl Slot {
    /// Byte offset of slot `pos` within a segment file.
    #[must_use]
    pub const fn position(pos: u64) -> u64 {
        pos * SLOT_SIZE
    }

    /// Byte offset of the index field of slot `pos`.
    #[must_use]
    pub const fn index_position(pos: u64) -> u64 {
        Self::position(pos) + INDEX_OFFSET
    }

    /// Encodes every field except the index, which the writer stores last.
    #[must_use]
    pub fn encode_body(&self) -> [u8; SLOT_SIZE as usize] {
        let mut buf = [0u8; SLOT_SIZE as usize];
        put(&mut buf, TERM_OFFSET, self.term);
        put(&mut buf, PAYLOAD_OFFSET, self.offset);
        put(&mut buf, TYPE_OFFSET, self.entry_type.as_tag());
        buf
    }

    /// Fields the payload checksum is keyed on.
    #[must_use]
    pub fn key(&self) -> EntryKey {
        EntryKey {
            index: self.index,
            term: self.term,
            entry_type: self.entry_type,
        }
    }

    /// Decodes a 32-byte slot. Returns `None` for an unwritten slot.
    pub fn decode(bytes: &[u8]) -> WalResult<Option<Self>> {
        if bytes.len() < SLOT_SIZE as usize {
            return Err(WalError::corruption("truncated slot"));
        }

        let index = get(bytes, INDEX_OFFSET);
        if index == 0 {
            return Ok(None);
        }

        let tag = get(bytes, TYPE_OFFSET);
        let entry_type = EntryType::from_tag(tag).ok_or_else(|| {
            WalError::corruption(format!("unknown entry type {tag} in slot for index {index}"))
        })?;

        Ok(Some(Self {
            term: get(bytes, TERM_OFFSET),
            index,
            offset: get(bytes, PAYLOAD_OFFSET),
            entry_type,
        }))
    }
}

fn get(bytes: &[u8], offset: u64) -> u64 {
    let start = offset as usize;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[start..start + 8]);
    u64::from_le_bytes(buf)
}

fn put(buf: &mut [u8], offset: u64, value: u64) {
    let start = offset as usize;
    buf[start..start + 8].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view over the bytes of a segment file.
///
/// Both the mapped [`LogSegment`](super::LogSegment) and offline tooling
/// reading a file into memory decode through this view.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    bytes: &'a [u8],
}

impl<'a> SegmentView<'a> {
    /// Wraps the bytes of a whole segment file.
    pub fn new(bytes: &'a [u8]) -> WalResult<Self> {
        if (bytes.len() as u64) < HEADER_SIZE {
            return Err(WalError::corruption(format!(
                "segment of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Size of the underlying file.
    #[must_use]
    pub fn file_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns true if the segment magic is present.
    #[must_use]
    pub fn has_magic(&self) -> bool {
        self.magic() == SEGMENT_MAGIC
    }

    /// Returns true if the magic region was never written.
    #[must_use]
    pub fn magic_is_blank(&self) -> bool {
        self.magic().iter().all(|&b| b == 0)
    }

    fn magic(&self) -> &[u8] {
        let start = SEGMENT_MAGIC_OFFSET as usize;
        &self.bytes[start..start + SEGMENT_MAGIC.len()]
    }

    /// Reads slot `pos`.
    pub fn slot(&self, pos: u64) -> WalResult<Option<Slot>> {
        if pos >= SLOTS_PER_SEGMENT {
            return Err(WalError::invalid_operation(format!(
                "slot {pos} is past the end of the slot table"
            )));
        }
        let start = Slot::position(pos) as usize;
        Slot::decode(&self.bytes[start..start + SLOT_SIZE as usize])
    }

    /// Reads the raw index field of slot `pos`, zero when unwritten.
    #[must_use]
    pub fn raw_index(&self, pos: u64) -> u64 {
        get(self.bytes, Slot::index_position(pos))
    }

    /// Position of the first unwritten slot, assuming the written slots form
    /// a prefix of the table.
    #[must_use]
    pub fn first_empty_slot(&self) -> u64 {
        let (mut lo, mut hi) = (0, SLOTS_PER_SEGMENT);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.raw_index(mid) == 0 {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Returns the payload referenced by `slot`, checking bounds and CRC.
    pub fn payload(&self, slot: &Slot) -> WalResult<&'a [u8]> {
        if slot.offset < HEADER_SIZE {
            return Err(WalError::corruption(format!(
                "entry {} has payload offset {} inside the header",
                slot.index, slot.offset
            )));
        }

        let start = slot.offset as usize;
        let body = start + FRAME_HEADER_SIZE as usize;
        let header = self
            .bytes
            .get(start..body)
            .ok_or_else(|| {
                WalError::corruption(format!(
                    "entry {} has payload offset {} past the end of the file",
                    slot.index, slot.offset
                ))
            })
            .and_then(FrameHeader::decode)?;

        let data = self.bytes.get(body..body + header.len as usize).ok_or_else(|| {
            WalError::corruption(format!(
                "payload of entry {} runs past the end of the file",
                slot.index
            ))
        })?;
        header.verify_entry(slot.key(), data).map_err(|_| {
            WalError::corruption(format!("payload checksum mismatch for entry {}", slot.index))
        })?;
        Ok(data)
    }

    /// Reads the entry in slot `pos`.
    pub fn entry(&self, pos: u64) -> WalResult<Entry> {
        let slot = self
            .slot(pos)?
            .ok_or_else(|| WalError::corruption(format!("slot {pos} is unwritten")))?;
        let data = self.payload(&slot)?;
        Ok(Entry {
            term: slot.term,
            index: slot.index,
            entry_type: slot.entry_type,
            data: data.to_vec(),
        })
    }

    /// Checks the slots `[0, len)`: indices must run consecutively and every
    /// payload must be intact.
    pub fn verify(&self, len: u64) -> WalResult<()> {
        let mut expected = None;
        for pos in 0..len {
            let slot = self
                .slot(pos)?
                .ok_or_else(|| WalError::corruption(format!("slot {pos} is unwritten")))?;
            if let Some(expected) = expected {
                if slot.index != expected {
                    return Err(WalError::corruption(format!(
                        "slot {pos} holds index {}, expected {expected}",
                        slot.index
                    )));
                }
            }
            self.payload(&slot)?;
            expected = Some(slot.index + 1);
        }
        Ok(())
    }
}
