//! Dump command implementation.

use super::offline::OfflineDir;
use crate::Format;
use raftwal_core::Entry;
use serde::Serialize;
use std::path::Path;

const DEFAULT_LIMIT: u64 = 100;
const PREVIEW_BYTES: usize = 32;

/// Log entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Log index.
    pub index: u64,
    /// Term.
    pub term: u64,
    /// Entry type.
    pub entry_type: String,
    /// Payload size in bytes.
    pub size: usize,
    /// Payload, hex-encoded.
    pub data: String,
}

impl From<&Entry> for EntryInfo {
    fn from(entry: &Entry) -> Self {
        Self {
            index: entry.index,
            term: entry.term,
            entry_type: format!("{:?}", entry.entry_type),
            size: entry.data.len(),
            data: hex(&entry.data),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: Option<u64>,
    limit: Option<u64>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_entries(path, from, limit.unwrap_or(DEFAULT_LIMIT))?;

    match format {
        Format::Json => {
            let infos: Vec<EntryInfo> = entries.iter().map(EntryInfo::from).collect();
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
        Format::Text => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn read_entries(
    path: &Path,
    from: Option<u64>,
    limit: u64,
) -> Result<Vec<Entry>, Box<dyn std::error::Error>> {
    let dir = OfflineDir::load(path)?;

    let first = dir.first_index();
    let last = dir.last_index();
    let lo = from.unwrap_or(first);
    if lo < first {
        return Err(format!("index {} is compacted, the log starts at {}", lo, first).into());
    }
    let hi = lo.saturating_add(limit).min(last + 1).max(lo);

    Ok(dir.entries(lo, hi)?)
}

fn print_text_output(entries: &[Entry]) {
    if entries.is_empty() {
        println!("(no entries)");
        return;
    }

    println!("{:>10}  {:>6}  {:<12}  {:>8}  DATA", "INDEX", "TERM", "TYPE", "SIZE");
    for entry in entries {
        let shown = &entry.data[..entry.data.len().min(PREVIEW_BYTES)];
        let ellipsis = if entry.data.len() > PREVIEW_BYTES { "..." } else { "" };
        println!(
            "{:>10}  {:>6}  {:<12}  {:>8}  {}{}",
            entry.index,
            entry.term,
            format!("{:?}", entry.entry_type),
            entry.data.len(),
            hex(shown),
            ellipsis
        );
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
