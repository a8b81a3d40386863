//! Inspect command implementation.

use super::offline::OfflineDir;
use crate::Format;
use raftwal_core::{HardState, LogStats, SegmentInfo};
use serde::Serialize;
use std::path::Path;

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Node id.
    pub node_id: u64,
    /// Cluster id.
    pub cluster_id: u64,
    /// Checkpoint index.
    pub checkpoint: u64,
    /// Stored hard state.
    pub hard_state: HardState,
    /// Stored snapshot.
    pub snapshot: SnapshotInfo,
    /// Log shape and counters.
    pub stats: LogStats,
    /// One record per segment file.
    pub segments: Vec<SegmentInfo>,
}

/// Snapshot summary.
#[derive(Debug, Serialize)]
pub struct SnapshotInfo {
    /// Last covered index.
    pub index: u64,
    /// Term at `index`.
    pub term: u64,
    /// Voting members.
    pub voters: Vec<u64>,
    /// Learners.
    pub learners: Vec<u64>,
    /// Size of the snapshot data.
    pub data_bytes: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Format::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let dir = OfflineDir::load(path)?;

    let meta = &dir.meta;
    let snapshot = &meta.snapshot;
    Ok(InspectResult {
        path: path.display().to_string(),
        node_id: meta.node_id,
        cluster_id: meta.cluster_id,
        checkpoint: meta.checkpoint,
        hard_state: meta.hard_state,
        snapshot: SnapshotInfo {
            index: snapshot.metadata.index,
            term: snapshot.metadata.term,
            voters: snapshot.metadata.conf_state.voters.clone(),
            learners: snapshot.metadata.conf_state.learners.clone(),
            data_bytes: snapshot.data.len(),
        },
        stats: dir.stats()?,
        segments: dir.segments(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("raftwal Data Directory Inspection");
    println!("=================================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Meta:");
    println!("  Node id:     {}", result.node_id);
    println!("  Cluster id:  {}", result.cluster_id);
    println!("  Checkpoint:  {}", result.checkpoint);
    println!(
        "  Hard state:  term {}, vote {}, commit {}",
        result.hard_state.term, result.hard_state.vote, result.hard_state.commit
    );
    println!("  Meta size:   {}", format_size(result.stats.meta_bytes));
    println!();
    println!("Snapshot:");
    if result.snapshot.index == 0 {
        println!("  (none)");
    } else {
        println!(
            "  Index {} term {}, {} data",
            result.snapshot.index,
            result.snapshot.term,
            format_size(result.snapshot.data_bytes as u64)
        );
        println!("  Voters:   {:?}", result.snapshot.voters);
        println!("  Learners: {:?}", result.snapshot.learners);
    }
    println!();
    println!("Log:");
    println!("  First index: {}", result.stats.first_index);
    println!("  Last index:  {}", result.stats.last_index);
    println!("  Payload:     {}", format_size(result.stats.payload_bytes));
    println!(
        "  Segments:    {} ({})",
        result.stats.segment_count,
        format_size(result.stats.segment_bytes)
    );

    for seg in &result.segments {
        let range = match (seg.first_index, seg.last_index) {
            (Some(first), Some(last)) => format!("{first}..={last}"),
            _ => "empty".to_string(),
        };
        println!(
            "  [{:05}] {:<20} {:>6} slots  {}",
            seg.id,
            range,
            seg.slots_used,
            format_size(seg.file_bytes)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftwal_core::{segment_file_name, ConfState, DurableLog, Entry, Snapshot};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_log_shape() {
        let dir = tempdir().unwrap();
        {
            let log = DurableLog::open(dir.path()).unwrap();
            let entries: Vec<Entry> = (1..=5).map(|i| Entry::new(2, i, vec![0u8; 10])).collect();
            log.save(&HardState::new(2, 1, 5), &entries, &Snapshot::default())
                .unwrap();
            log.create_snapshot(3, ConfState::with_voters([1, 2]), vec![1, 2, 3])
                .unwrap();
            log.set_node_id(7).unwrap();
            log.close().unwrap();
        }

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.node_id, 7);
        assert_eq!(result.hard_state.commit, 5);
        assert_eq!(result.snapshot.index, 3);
        assert_eq!(result.snapshot.voters, vec![1, 2]);
        assert_eq!(result.snapshot.data_bytes, 3);
        assert_eq!(result.stats.first_index, 4);
        assert_eq!(result.stats.last_index, 5);
        assert_eq!(result.segments.len(), 1);
    }

    #[test]
    fn inspect_leaves_files_untouched() {
        let dir = tempdir().unwrap();
        {
            let log = DurableLog::open(dir.path()).unwrap();
            let entries: Vec<Entry> = (1..=3).map(|i| Entry::new(1, i, vec![1u8; 4])).collect();
            log.save(&HardState::new(1, 1, 3), &entries, &Snapshot::default())
                .unwrap();
            log.close().unwrap();
        }
        // A slot past the end that an open would clear.
        let segment = dir.path().join(segment_file_name(1));
        let mut bytes = fs::read(&segment).unwrap();
        bytes[10 * 32 + 8] = 42;
        fs::write(&segment, &bytes).unwrap();

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.stats.last_index, 3);
        assert_eq!(fs::read(&segment).unwrap(), bytes);
    }

    #[test]
    fn inspect_does_not_create_directories() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(inspect(&missing).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
