//! Read-only access to a data directory.
//!
//! Files are read into memory and decoded through `SegmentView` and
//! `read_meta`. Nothing is mapped, locked or repaired, so the commands built
//! on this leave the directory exactly as they found it. A torn tail is
//! skipped the way the next open would trim it.

use raftwal_core::{
    list_segment_files, meta_file_path, read_meta, Entry, LogStats, MetaContents, SegmentInfo,
    SegmentView, WalError, WalResult, FRAME_HEADER_SIZE, HEADER_SIZE,
};
use std::fs;
use std::path::Path;

/// Number of leading slots a log open keeps, and the torn slots it drops
/// from the tail.
pub fn intact_prefix(view: &SegmentView<'_>) -> (u64, u64) {
    let mut len = view.first_empty_slot();
    let mut torn = 0;
    while len > 0 {
        let intact = match view.slot(len - 1) {
            Ok(Some(slot)) => view.payload(&slot).is_ok(),
            _ => false,
        };
        if intact {
            break;
        }
        len -= 1;
        torn += 1;
    }
    (len, torn)
}

/// One segment file held in memory.
#[derive(Debug)]
pub struct SegmentFile {
    id: u64,
    bytes: Vec<u8>,
    len: u64,
    first: Option<u64>,
}

impl SegmentFile {
    fn read(id: u64, path: &Path) -> WalResult<Self> {
        let bytes = fs::read(path)?;
        let view = SegmentView::new(&bytes)?;
        let (len, _) = intact_prefix(&view);
        let first = if len > 0 {
            view.slot(0)?.map(|slot| slot.index)
        } else {
            None
        };
        Ok(Self {
            id,
            bytes,
            len,
            first,
        })
    }

    fn view(&self) -> WalResult<SegmentView<'_>> {
        SegmentView::new(&self.bytes)
    }

    fn last(&self) -> Option<u64> {
        self.first.map(|first| first + self.len - 1)
    }

    fn contains(&self, index: u64) -> bool {
        self.first
            .is_some_and(|first| index >= first && index < first + self.len)
    }

    fn payload_bytes(&self) -> WalResult<u64> {
        if self.len == 0 {
            return Ok(0);
        }
        let view = self.view()?;
        let slot = view
            .slot(self.len - 1)?
            .ok_or_else(|| WalError::corruption(format!("slot {} is unwritten", self.len - 1)))?;
        let payload = view.payload(&slot)?;
        Ok(slot.offset + FRAME_HEADER_SIZE + payload.len() as u64 - HEADER_SIZE)
    }

    fn info(&self) -> SegmentInfo {
        SegmentInfo {
            id: self.id,
            first_index: self.first,
            last_index: self.last(),
            slots_used: self.len,
            file_bytes: self.bytes.len() as u64,
        }
    }
}

/// A data directory read into memory.
#[derive(Debug)]
pub struct OfflineDir {
    /// Decoded meta file.
    pub meta: MetaContents,
    meta_bytes: u64,
    segments: Vec<SegmentFile>,
}

impl OfflineDir {
    /// Reads the meta file and every segment of `path`.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.is_dir() {
            return Err(format!("No data directory at {:?}", path).into());
        }
        let meta_path = meta_file_path(path);
        if !meta_path.exists() {
            return Err(format!("No meta file in {:?}", path).into());
        }

        let bytes = fs::read(&meta_path)?;
        let meta = read_meta(&bytes)?;

        let mut segments = list_segment_files(path)?
            .into_iter()
            .map(|(id, segment_path)| SegmentFile::read(id, &segment_path))
            .collect::<WalResult<Vec<_>>>()?;
        segments.sort_by_key(|s| (s.first.is_none(), s.first, s.id));

        Ok(Self {
            meta,
            meta_bytes: bytes.len() as u64,
            segments,
        })
    }

    fn snapshot_index(&self) -> u64 {
        self.meta.snapshot.metadata.index
    }

    /// First available index.
    pub fn first_index(&self) -> u64 {
        let snapshot_index = self.snapshot_index();
        if snapshot_index > 0 {
            return snapshot_index + 1;
        }
        self.segments.first().and_then(|s| s.first).unwrap_or(1)
    }

    /// Last stored index, counting the snapshot.
    pub fn last_index(&self) -> u64 {
        self.segments
            .iter()
            .filter_map(SegmentFile::last)
            .max()
            .unwrap_or(0)
            .max(self.snapshot_index())
    }

    /// Reads entries `[lo, hi)`.
    pub fn entries(&self, lo: u64, hi: u64) -> WalResult<Vec<Entry>> {
        if lo < self.first_index() {
            return Err(WalError::Compacted);
        }
        let mut entries = Vec::new();
        for index in lo..hi {
            let segment = self
                .segments
                .iter()
                .find(|s| s.contains(index))
                .ok_or(WalError::Unavailable)?;
            let first = segment.first.ok_or(WalError::Unavailable)?;
            entries.push(segment.view()?.entry(index - first)?);
        }
        Ok(entries)
    }

    /// Shape of the log. Counters stay at zero.
    pub fn stats(&self) -> WalResult<LogStats> {
        let mut payload_bytes = 0;
        for segment in &self.segments {
            payload_bytes += segment.payload_bytes()?;
        }
        Ok(LogStats {
            first_index: self.first_index(),
            last_index: self.last_index(),
            snapshot_index: self.snapshot_index(),
            snapshot_term: self.meta.snapshot.metadata.term,
            segment_count: self.segments.len(),
            segment_bytes: self.segments.iter().map(|s| s.bytes.len() as u64).sum(),
            payload_bytes,
            meta_bytes: self.meta_bytes,
            counters: Default::default(),
        })
    }

    /// Describes every segment, oldest first.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.segments.iter().map(SegmentFile::info).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftwal_core::{ConfState, DurableLog, HardState, Snapshot};
    use tempfile::tempdir;

    fn write_log(path: &Path) {
        let log = DurableLog::open(path).unwrap();
        let entries: Vec<Entry> = (1..=8).map(|i| Entry::new(2, i, vec![i as u8; 4])).collect();
        log.save(&HardState::new(2, 1, 8), &entries, &Snapshot::default())
            .unwrap();
        log.create_snapshot(3, ConfState::with_voters([1]), b"snap".to_vec())
            .unwrap();
        log.close().unwrap();
    }

    #[test]
    fn matches_an_open_log() {
        let dir = tempdir().unwrap();
        write_log(dir.path());

        let offline = OfflineDir::load(dir.path()).unwrap();
        let log = DurableLog::open(dir.path()).unwrap();
        assert_eq!(offline.first_index(), log.first_index().unwrap());
        assert_eq!(offline.last_index(), log.last_index().unwrap());
        assert_eq!(
            offline.entries(4, 9).unwrap(),
            log.entries(4, 9, None).unwrap()
        );
        assert_eq!(offline.segments(), log.segments().unwrap());

        let stats = offline.stats().unwrap();
        let live = log.stats().unwrap();
        assert_eq!(stats.payload_bytes, live.payload_bytes);
        assert_eq!(stats.segment_bytes, live.segment_bytes);
    }

    #[test]
    fn entries_respect_bounds() {
        let dir = tempdir().unwrap();
        write_log(dir.path());

        let offline = OfflineDir::load(dir.path()).unwrap();
        assert!(matches!(offline.entries(2, 5), Err(WalError::Compacted)));
        assert!(matches!(offline.entries(8, 10), Err(WalError::Unavailable)));
        assert!(offline.entries(9, 9).unwrap().is_empty());
    }

    #[test]
    fn missing_meta_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(OfflineDir::load(dir.path()).is_err());
        assert!(!meta_file_path(dir.path()).exists());
    }
}
