//! The ordered run of segments behind the log.

use crate::dir::{segment_file_name, sync_dir, DataDir};
use crate::error::{WalError, WalResult};
use crate::segment::LogSegment;
use crate::types::Entry;
use std::path::PathBuf;
use tracing::debug;

/// A gapless, compactable index range stored across many segments.
///
/// Segments are kept sorted by first index and hold contiguous ranges. The
/// last segment is the active one: it receives appends and is the only one
/// that may be empty.
#[derive(Debug)]
pub struct LogSet {
    dir: PathBuf,
    segment_initial_size: u64,
    segments: Vec<LogSegment>,
    next_id: u64,
}

impl LogSet {
    /// Loads every segment in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if two files share a segment id or the segments
    /// do not form one contiguous range.
    pub fn load(dir: &DataDir, segment_initial_size: u64) -> WalResult<Self> {
        let mut files = dir.list_segments()?;
        files.sort_by_key(|(id, _)| *id);
        if let Some(pair) = files.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(WalError::corruption(format!(
                "segment id {} is claimed by both {} and {}",
                pair[0].0,
                pair[0].1.display(),
                pair[1].1.display()
            )));
        }
        let next_id = files.last().map_or(1, |(id, _)| id + 1);

        let mut segments = Vec::with_capacity(files.len());
        for (id, path) in &files {
            segments.push(LogSegment::open(*id, path, segment_initial_size)?);
        }
        segments.sort_by_key(|s| (s.first_index().is_none(), s.first_index(), s.id()));

        let mut set = Self {
            dir: dir.path().to_path_buf(),
            segment_initial_size,
            segments,
            next_id,
        };
        set.remove_extra_empty_segments()?;
        set.check_contiguous()?;

        debug!(
            segments = set.segments.len(),
            first = ?set.first_index(),
            last = ?set.last_index(),
            "loaded log segments"
        );
        Ok(set)
    }

    /// Keeps at most one empty segment, and only if it is the newest file.
    fn remove_extra_empty_segments(&mut self) -> WalResult<()> {
        let newest = self.segments.iter().map(LogSegment::id).max();
        let mut removed = false;
        let mut kept = Vec::with_capacity(self.segments.len());
        for segment in std::mem::take(&mut self.segments) {
            if segment.is_empty() && Some(segment.id()) != newest {
                debug!(id = segment.id(), "removing empty segment");
                segment.delete()?;
                removed = true;
            } else {
                kept.push(segment);
            }
        }
        self.segments = kept;
        if removed {
            sync_dir(&self.dir)?;
        }
        Ok(())
    }

    fn check_contiguous(&self) -> WalResult<()> {
        let ranges: Vec<(u64, u64, u64)> = self
            .segments
            .iter()
            .filter_map(|s| Some((s.id(), s.first_index()?, s.last_index()?)))
            .collect();
        for pair in ranges.windows(2) {
            let (prev_id, _, prev_last) = pair[0];
            let (id, first, _) = pair[1];
            if first != prev_last + 1 {
                return Err(WalError::corruption(format!(
                    "segment {id} starts at {first} but segment {prev_id} ends at {prev_last}"
                )));
            }
        }
        Ok(())
    }

    /// Oldest stored index.
    #[must_use]
    pub fn first_index(&self) -> Option<u64> {
        self.segments.first().and_then(LogSegment::first_index)
    }

    /// Newest stored index.
    #[must_use]
    pub fn last_index(&self) -> Option<u64> {
        self.segments.iter().rev().find_map(LogSegment::last_index)
    }

    /// Returns true if no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_index().is_none()
    }

    /// The segments, oldest first.
    #[must_use]
    pub fn segments(&self) -> &[LogSegment] {
        &self.segments
    }

    /// Id the next created segment will get.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Position in `segments` of the segment holding `index`.
    fn locate(&self, index: u64) -> Option<usize> {
        let after = self
            .segments
            .partition_point(|s| s.first_index().is_some_and(|first| first <= index));
        let pos = after.checked_sub(1)?;
        self.segments[pos].contains(index).then_some(pos)
    }

    fn check_range(&self, index: u64) -> WalResult<()> {
        match (self.first_index(), self.last_index()) {
            (Some(first), _) if index < first => Err(WalError::Compacted),
            (Some(_), Some(last)) if index <= last => Ok(()),
            _ => Err(WalError::Unavailable),
        }
    }

    /// Term of the entry at `index`.
    pub fn term(&self, index: u64) -> WalResult<u64> {
        self.check_range(index)?;
        let pos = self
            .locate(index)
            .ok_or_else(|| WalError::corruption(format!("no segment holds index {index}")))?;
        self.segments[pos]
            .term_at(index)?
            .ok_or_else(|| WalError::corruption(format!("index {index} is missing from its segment")))
    }

    /// Entries in `[lo, hi)`.
    ///
    /// Stops before the payload total would exceed `max_size`, but always
    /// returns at least one entry.
    ///
    /// # Errors
    ///
    /// `Compacted` if `lo` is below the oldest stored index, `Unavailable`
    /// if `hi - 1` has not been written.
    pub fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> WalResult<Vec<Entry>> {
        if lo > hi {
            return Err(WalError::invalid_operation(format!(
                "invalid range [{lo}, {hi})"
            )));
        }
        if lo == hi {
            return Ok(Vec::new());
        }
        self.check_range(lo)?;
        self.check_range(hi - 1)?;

        let mut seg_pos = self
            .locate(lo)
            .ok_or_else(|| WalError::corruption(format!("no segment holds index {lo}")))?;
        let mut slot = self.segments[seg_pos]
            .slot_ge(lo)?
            .ok_or_else(|| WalError::corruption(format!("index {lo} is missing from its segment")))?;

        let limit = max_size.unwrap_or(u64::MAX);
        let mut total = 0u64;
        let mut out = Vec::with_capacity((hi - lo).min(1024) as usize);
        let mut next = lo;
        while next < hi {
            let segment = &self.segments[seg_pos];
            if slot >= segment.len() {
                seg_pos += 1;
                slot = 0;
                if seg_pos >= self.segments.len() {
                    return Err(WalError::corruption(format!(
                        "log ends before index {next}"
                    )));
                }
                continue;
            }

            let entry = segment.get_entry(slot)?;
            if entry.index != next {
                return Err(WalError::corruption(format!(
                    "expected index {next}, found {}",
                    entry.index
                )));
            }
            total = total.saturating_add(entry.size());
            if !out.is_empty() && total > limit {
                break;
            }
            out.push(entry);
            slot += 1;
            next += 1;
        }
        Ok(out)
    }

    /// Appends a consecutive batch.
    ///
    /// A batch starting at or below the last index replaces everything from
    /// its first index onward. Segments are rotated when the active one is
    /// full.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a batch that is not consecutive or would leave
    /// a gap, `Compacted` for a batch starting below the oldest index.
    pub fn add_entries(&mut self, entries: &[Entry]) -> WalResult<()> {
        let Some(head) = entries.first() else {
            return Ok(());
        };
        let start = head.index;
        if start == 0 {
            return Err(WalError::invalid_operation("log indices start at 1"));
        }
        if let Some((i, entry)) = entries
            .iter()
            .enumerate()
            .find(|(i, entry)| entry.index != start + *i as u64)
        {
            return Err(WalError::invalid_operation(format!(
                "batch is not consecutive: position {i} holds index {}",
                entry.index
            )));
        }

        if let (Some(first), Some(last)) = (self.first_index(), self.last_index()) {
            if start < first {
                return Err(WalError::Compacted);
            }
            if start > last + 1 {
                return Err(WalError::invalid_operation(format!(
                    "append at {start} leaves a gap after {last}"
                )));
            }
            if start <= last {
                self.truncate_at(start)?;
            }
        }

        let mut rest = entries;
        while !rest.is_empty() {
            if self.segments.last().map_or(true, LogSegment::is_full) {
                self.rotate()?;
            }
            let Some(active) = self.segments.last_mut() else {
                return Err(WalError::invalid_operation("no active segment"));
            };
            let written = active.append(rest)?;
            rest = &rest[written..];
        }
        Ok(())
    }

    /// Removes `index` and everything after it.
    ///
    /// Newer segments are deleted before the containing one is truncated, so
    /// a crash in between never leaves a gap.
    fn truncate_at(&mut self, index: u64) -> WalResult<()> {
        let pos = self
            .locate(index)
            .ok_or_else(|| WalError::corruption(format!("no segment holds index {index}")))?;

        let mut deleted = 0;
        while self.segments.len() > pos + 1 {
            if let Some(segment) = self.segments.pop() {
                segment.delete()?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            sync_dir(&self.dir)?;
        }

        let segment = &mut self.segments[pos];
        let slot = segment
            .slot_ge(index)?
            .ok_or_else(|| WalError::corruption(format!("index {index} is missing from its segment")))?;
        segment.truncate_from(slot)?;

        debug!(from = index, deleted, "overwrote log tail");
        Ok(())
    }

    fn rotate(&mut self) -> WalResult<()> {
        let id = self.next_id;
        let path = self.dir.join(segment_file_name(id));
        let segment = LogSegment::open(id, &path, self.segment_initial_size)?;
        sync_dir(&self.dir)?;

        debug!(id, after = ?self.last_index(), "rotated to new segment");
        self.segments.push(segment);
        self.next_id += 1;
        Ok(())
    }

    /// Deletes every segment whose entries all lie below `index`. The active
    /// segment is always kept.
    pub fn delete_before(&mut self, index: u64) -> WalResult<usize> {
        let mut deleted = 0;
        while self.segments.len() > 1
            && self.segments[0]
                .last_index()
                .is_some_and(|last| last < index)
        {
            let segment = self.segments.remove(0);
            debug!(
                id = segment.id(),
                last = ?segment.last_index(),
                before = index,
                "compacting segment"
            );
            segment.delete()?;
            deleted += 1;
        }
        if deleted > 0 {
            sync_dir(&self.dir)?;
        }
        Ok(deleted)
    }

    /// Deletes every segment, newest first.
    ///
    /// A crash part way leaves the oldest segments, still contiguous.
    pub fn discard_all(&mut self) -> WalResult<()> {
        let count = self.segments.len();
        while let Some(segment) = self.segments.pop() {
            segment.delete()?;
        }
        if count > 0 {
            sync_dir(&self.dir)?;
            debug!(count, "discarded log");
        }
        Ok(())
    }

    /// Flushes every segment written since its last sync.
    pub fn sync(&mut self) -> WalResult<()> {
        for segment in &mut self.segments {
            segment.sync()?;
        }
        Ok(())
    }

    /// Total size of the segment files.
    #[must_use]
    pub fn file_bytes(&self) -> u64 {
        self.segments.iter().map(LogSegment::file_len).sum()
    }

    /// Total size of the stored payload frames.
    #[must_use]
    pub fn payload_bytes(&self) -> u64 {
        self.segments.iter().map(LogSegment::payload_bytes).sum()
    }
}
