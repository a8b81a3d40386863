//! Verify command implementation.
//!
//! Reads every file into memory and never opens the log, so a directory
//! can be checked while it is not in use without repairing anything.

use super::offline::intact_prefix;
use raftwal_core::{
    list_segment_files, meta_file_path, read_meta, SegmentView, SLOTS_PER_SEGMENT,
};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segment files checked.
    pub segments_checked: usize,
    /// Number of entries checked.
    pub entries_checked: u64,
    /// Conditions the next open repairs.
    pub warnings: Vec<String>,
    /// Corruption found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Index range held by one segment, after dropping a repairable tail.
#[derive(Debug)]
struct SegmentRange {
    id: u64,
    first: Option<u64>,
    len: u64,
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying data directory at {:?}", path);
    println!();

    let result = verify_dir(path)?;

    println!(
        "Checked {} segments, {} entries",
        result.segments_checked, result.entries_checked
    );
    for warning in &result.warnings {
        println!("  ! {}", warning);
    }
    for error in &result.errors {
        println!("  - {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Data directory verification passed");
        Ok(())
    } else {
        println!("✗ Data directory verification failed");
        Err("Verification failed".into())
    }
}

fn verify_dir(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No data directory at {:?}", path).into());
    }

    let mut result = VerifyResult::default();

    let mut snapshot_index = 0;
    let meta_path = meta_file_path(path);
    if meta_path.exists() {
        let bytes = fs::read(&meta_path)?;
        match read_meta(&bytes) {
            Ok(meta) => {
                debug!(
                    version = meta.version,
                    snapshot_index = meta.snapshot.metadata.index,
                    "meta file ok"
                );
                if (meta.snapshot_index, meta.snapshot_term)
                    != (meta.snapshot.metadata.index, meta.snapshot.metadata.term)
                {
                    result.warnings.push(format!(
                        "meta: snapshot fields {}/{} disagree with snapshot {}/{}",
                        meta.snapshot_index,
                        meta.snapshot_term,
                        meta.snapshot.metadata.index,
                        meta.snapshot.metadata.term
                    ));
                }
                snapshot_index = meta.snapshot.metadata.index;
            }
            Err(e) => result.errors.push(format!("meta: {}", e)),
        }
    } else {
        result.warnings.push("meta: file missing".to_string());
    }

    let mut ranges = Vec::new();
    for (id, segment_path) in list_segment_files(path)? {
        let bytes = fs::read(&segment_path)?;
        result.segments_checked += 1;
        match verify_segment(id, &bytes, &mut result) {
            Ok(range) => ranges.push(range),
            Err(e) => result.errors.push(format!("segment {:05}: {}", id, e)),
        }
    }

    check_ranges(&ranges, snapshot_index, &mut result);
    Ok(result)
}

fn verify_segment(
    id: u64,
    bytes: &[u8],
    result: &mut VerifyResult,
) -> Result<SegmentRange, Box<dyn std::error::Error>> {
    let view = SegmentView::new(bytes)?;
    if !view.has_magic() {
        if view.magic_is_blank() {
            result
                .warnings
                .push(format!("segment {:05}: magic not yet written", id));
        } else {
            return Err("not a segment file".into());
        }
    }

    let (len, torn) = intact_prefix(&view);
    if torn > 0 {
        result
            .warnings
            .push(format!("segment {:05}: {} torn tail slots", id, torn));
    }

    let stale = (len + torn..SLOTS_PER_SEGMENT)
        .filter(|&pos| view.raw_index(pos) != 0)
        .count();
    if stale > 0 {
        result
            .warnings
            .push(format!("segment {:05}: {} stale slots past the end", id, stale));
    }

    view.verify(len)?;
    result.entries_checked += len;

    let first = if len > 0 {
        view.slot(0)?.map(|slot| slot.index)
    } else {
        None
    };
    debug!(id, ?first, len, "segment ok");
    Ok(SegmentRange { id, first, len })
}

/// Checks that the segments chain into one run of indices that the snapshot
/// reaches.
fn check_ranges(ranges: &[SegmentRange], snapshot_index: u64, result: &mut VerifyResult) {
    let mut written: Vec<&SegmentRange> = ranges.iter().filter(|r| r.first.is_some()).collect();
    written.sort_by_key(|r| r.first);

    for pair in written.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let (Some(prev_first), Some(next_first)) = (prev.first, next.first) else {
            continue;
        };
        let expected = prev_first + prev.len;
        if next_first != expected {
            result.errors.push(format!(
                "segment {:05} starts at {}, expected {} after segment {:05}",
                next.id, next_first, expected, prev.id
            ));
        }
        if next.id < prev.id {
            result.errors.push(format!(
                "segment {:05} holds later indices than segment {:05}",
                prev.id, next.id
            ));
        }
    }

    if let Some(Some(first)) = written.first().map(|r| r.first) {
        if first > snapshot_index + 1 && snapshot_index > 0 {
            result.warnings.push(format!(
                "log starts at {} past snapshot {}, left by an interrupted discard",
                first, snapshot_index
            ));
        } else if first > snapshot_index + 1 {
            result.errors.push(format!(
                "log starts at {} but the snapshot only covers up to {}",
                first, snapshot_index
            ));
        }
    }

    let empty: Vec<u64> = ranges
        .iter()
        .filter(|r| r.first.is_none())
        .map(|r| r.id)
        .collect();
    let newest = ranges.iter().map(|r| r.id).max();
    for id in empty {
        if Some(id) != newest {
            result
                .warnings
                .push(format!("segment {:05}: empty and not the newest", id));
        }
    }
}
