//! A single mapped segment file.

use super::{SegmentView, Slot, HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_MAGIC_OFFSET, SLOTS_PER_SEGMENT};
use crate::codec::{EntryKey, FrameHeader, FRAME_HEADER_SIZE};
use crate::error::{WalError, WalResult};
use crate::types::Entry;
use raftwal_storage::MappedFile;
use std::path::Path;
use tracing::{debug, warn};

/// A contiguous run of entries stored as fixed slots plus payload frames.
///
/// The slots `[0, len)` are written and hold consecutive indices; every
/// slot at or beyond `len` is zero on disk.
#[derive(Debug)]
pub struct LogSegment {
    id: u64,
    file: MappedFile,
    /// Number of written slots, which is also the write cursor.
    len: u64,
    first: Option<u64>,
    /// End of the last payload frame.
    payload_end: u64,
    dirty: bool,
}

impl LogSegment {
    /// Opens or creates segment `id` at `path`.
    ///
    /// An existing segment is recovered: torn tail slots whose payload is
    /// missing or fails its checksum are cleared, and stale slots beyond the
    /// write cursor are zeroed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the file carries a foreign magic, and
    /// `Corruption` if the written slots do not hold consecutive indices.
    pub fn open(id: u64, path: &Path, initial_size: u64) -> WalResult<Self> {
        let (mut file, is_new) = MappedFile::open(path, initial_size.max(HEADER_SIZE + 4096))?;

        let (has_magic, blank) = {
            let view = SegmentView::new(file.slice(0)?)?;
            (view.has_magic(), view.magic_is_blank())
        };
        if is_new || blank {
            file.write_at(SEGMENT_MAGIC_OFFSET, &SEGMENT_MAGIC)?;
            file.sync()?;
            debug!(id, path = %path.display(), "created segment");
        } else if !has_magic {
            return Err(WalError::invalid_format(format!(
                "{} is not a segment file",
                path.display()
            )));
        }

        let mut segment = Self {
            id,
            file,
            len: 0,
            first: None,
            payload_end: HEADER_SIZE,
            dirty: false,
        };
        segment.recover()?;
        Ok(segment)
    }

    fn recover(&mut self) -> WalResult<()> {
        let mut len = self.view()?.first_empty_slot();

        let mut trimmed = 0u64;
        while len > 0 {
            let view = self.view()?;
            let intact = match view.slot(len - 1) {
                Ok(Some(slot)) => view.payload(&slot).is_ok(),
                _ => false,
            };
            if intact {
                break;
            }
            len -= 1;
            trimmed += 1;
            self.zero_slot(len)?;
        }

        let stale: Vec<u64> = {
            let view = self.view()?;
            (len..SLOTS_PER_SEGMENT)
                .filter(|&pos| view.raw_index(pos) != 0)
                .collect()
        };
        for &pos in &stale {
            self.zero_slot(pos)?;
        }

        let view = self.view()?;
        let mut first = None;
        let mut payload_end = HEADER_SIZE;
        for pos in 0..len {
            let slot = view
                .slot(pos)?
                .ok_or_else(|| WalError::corruption(format!("slot {pos} is unwritten")))?;
            let first_index = *first.get_or_insert(slot.index);
            if slot.index != first_index + pos {
                return Err(WalError::corruption(format!(
                    "segment {} slot {pos} holds index {}, expected {}",
                    self.id,
                    slot.index,
                    first_index + pos
                )));
            }
            if pos + 1 == len {
                let payload = view.payload(&slot)?;
                payload_end = slot.offset + FRAME_HEADER_SIZE + payload.len() as u64;
            }
        }

        self.len = len;
        self.first = first;
        self.payload_end = payload_end;

        if trimmed > 0 || !stale.is_empty() {
            warn!(
                id = self.id,
                trimmed,
                stale = stale.len(),
                len,
                "recovered segment tail"
            );
            self.file.sync()?;
        }
        Ok(())
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the path to the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of written slots.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no slot is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if every slot is written.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == SLOTS_PER_SEGMENT
    }

    /// Position of the first unwritten slot.
    #[must_use]
    pub fn first_empty_slot(&self) -> u64 {
        self.len
    }

    /// Index held by slot 0.
    #[must_use]
    pub fn first_index(&self) -> Option<u64> {
        self.first
    }

    /// Index held by the last written slot.
    #[must_use]
    pub fn last_index(&self) -> Option<u64> {
        self.first.map(|first| first + self.len - 1)
    }

    /// Returns true if `index` is stored here.
    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        match (self.first_index(), self.last_index()) {
            (Some(first), Some(last)) => (first..=last).contains(&index),
            _ => false,
        }
    }

    /// Size of the segment file.
    #[must_use]
    pub fn file_len(&self) -> u64 {
        self.file.len()
    }

    /// Bytes used by payload frames.
    #[must_use]
    pub fn payload_bytes(&self) -> u64 {
        self.payload_end - HEADER_SIZE
    }

    /// Returns true if the segment was written since its last sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn view(&self) -> WalResult<SegmentView<'_>> {
        SegmentView::new(self.file.slice(0)?)
    }

    /// Reads slot `pos`, `None` at or beyond the write cursor.
    pub fn slot(&self, pos: u64) -> WalResult<Option<Slot>> {
        if pos >= self.len {
            return Ok(None);
        }
        self.view()?.slot(pos)
    }

    /// Position of the first slot whose index is at least `target`, or
    /// `None` if every written index is below it.
    pub fn slot_ge(&self, target: u64) -> WalResult<Option<u64>> {
        let Some(first) = self.first else {
            return Ok(None);
        };
        if target <= first {
            return Ok(Some(0));
        }

        let view = self.view()?;
        let guess = target - first;
        if guess < self.len && view.raw_index(guess) == target {
            return Ok(Some(guess));
        }

        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if view.raw_index(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok((lo < self.len).then_some(lo))
    }

    /// Term of the entry at `index`, `None` if it is not stored here.
    pub fn term_at(&self, index: u64) -> WalResult<Option<u64>> {
        match self.slot_ge(index)? {
            Some(pos) => Ok(self
                .slot(pos)?
                .filter(|slot| slot.index == index)
                .map(|slot| slot.term)),
            None => Ok(None),
        }
    }

    /// Reads the entry in slot `pos`, copying its payload out of the mapping.
    pub fn get_entry(&self, pos: u64) -> WalResult<Entry> {
        if pos >= self.len {
            return Err(WalError::invalid_operation(format!(
                "slot {pos} is beyond the {} written slots of segment {}",
                self.len, self.id
            )));
        }
        self.view()?.entry(pos)
    }

    /// Appends as many of `entries` as there are free slots.
    ///
    /// Each payload is written before its slot, and the slot's index field
    /// last. The mapping doubles whenever a payload does not fit. Returns the
    /// number of entries written.
    pub fn append(&mut self, entries: &[Entry]) -> WalResult<usize> {
        let mut written = 0;
        for entry in entries {
            if self.is_full() {
                break;
            }
            let expected = self.last_index().map(|last| last + 1);
            if entry.index == 0 || expected.is_some_and(|next| entry.index != next) {
                return Err(WalError::invalid_operation(format!(
                    "segment {} cannot take index {} after {:?}",
                    self.id,
                    entry.index,
                    self.last_index()
                )));
            }

            let header = FrameHeader::for_entry(EntryKey::from(entry), &entry.data)?;
            let offset = self.payload_end;
            let end = offset + header.framed_len();
            self.ensure_capacity(end)?;

            self.file.write_at(offset, &header.encode())?;
            self.file.write_at(offset + FRAME_HEADER_SIZE, &entry.data)?;

            let pos = self.len;
            let slot = Slot {
                term: entry.term,
                index: entry.index,
                offset,
                entry_type: entry.entry_type,
            };
            self.file.write_at(Slot::position(pos), &slot.encode_body())?;
            self.file.write_u64(Slot::index_position(pos), entry.index)?;

            self.first.get_or_insert(entry.index);
            self.len += 1;
            self.payload_end = end;
            self.dirty = true;
            written += 1;
        }
        Ok(written)
    }

    fn ensure_capacity(&mut self, end: u64) -> WalResult<()> {
        let mut size = self.file.len();
        if end <= size {
            return Ok(());
        }
        while size < end {
            size *= 2;
        }
        self.file.grow(size)?;
        Ok(())
    }

    /// Clears slots `[pos, len)`, highest first, and syncs.
    ///
    /// A crash part way leaves a shorter but still contiguous prefix.
    pub fn truncate_from(&mut self, pos: u64) -> WalResult<()> {
        if pos >= self.len {
            return Ok(());
        }

        for p in (pos..self.len).rev() {
            self.zero_slot(p)?;
        }
        let removed = self.len - pos;
        self.len = pos;

        if pos == 0 {
            self.first = None;
            self.payload_end = HEADER_SIZE;
        } else {
            let view = self.view()?;
            let slot = view
                .slot(pos - 1)?
                .ok_or_else(|| WalError::corruption(format!("slot {} is unwritten", pos - 1)))?;
            let payload = view.payload(&slot)?;
            self.payload_end = slot.offset + FRAME_HEADER_SIZE + payload.len() as u64;
        }

        self.file.sync()?;
        self.dirty = false;
        debug!(id = self.id, from = pos, removed, "truncated segment");
        Ok(())
    }

    fn zero_slot(&mut self, pos: u64) -> WalResult<()> {
        self.file.write_u64(Slot::index_position(pos), 0)?;
        self.file.zero(Slot::position(pos)..Slot::position(pos + 1))?;
        Ok(())
    }

    /// Flushes the segment if it was written since the last sync.
    pub fn sync(&mut self) -> WalResult<()> {
        if self.dirty {
            self.file.sync()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Unmaps and removes the segment file.
    pub fn delete(self) -> WalResult<()> {
        debug!(id = self.id, first = ?self.first, len = self.len, "deleting segment");
        self.file.remove()?;
        Ok(())
    }
}
