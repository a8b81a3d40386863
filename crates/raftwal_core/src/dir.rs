//! Data directory management.
//!
//! This module handles the file system layout of a log:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ wal.meta      # Scalars, hard state and snapshot
//! ├─ 00001.wal     # Log segments, numbered by creation order
//! └─ 00002.wal
//! ```

use crate::error::{WalError, WalResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File names within the data directory.
const LOCK_FILE: &str = "LOCK";
const META_FILE: &str = "wal.meta";
const SEGMENT_EXTENSION: &str = "wal";

/// Owns a data directory and holds its lock.
///
/// Only one `DataDir` can exist per directory at a time, across processes.
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DataDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> WalResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(WalError::invalid_format(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(WalError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(WalError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the meta file.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Returns the path to a segment file.
    ///
    /// Segment 1 is `00001.wal`.
    #[must_use]
    pub fn segment_path(&self, segment_id: u64) -> PathBuf {
        self.path.join(segment_file_name(segment_id))
    }

    /// Lists segment files as `(id, path)` pairs, unsorted.
    ///
    /// Files whose stem is not a number are ignored. Two files that parse to
    /// the same id are both returned; rejecting them is the caller's job.
    pub fn list_segments(&self) -> WalResult<Vec<(u64, PathBuf)>> {
        list_segment_files(&self.path)
    }

    /// Syncs the directory so created and removed files are durable.
    pub fn sync(&self) -> WalResult<()> {
        sync_dir(&self.path)
    }
}

/// Syncs a directory so created and removed files are durable.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> WalResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Syncs a directory so created and removed files are durable.
#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> WalResult<()> {
    // Windows NTFS journal provides metadata durability guarantees
    Ok(())
}

/// Returns the file name of a segment.
#[must_use]
pub fn segment_file_name(segment_id: u64) -> String {
    format!("{segment_id:05}.{SEGMENT_EXTENSION}")
}

/// Parses a segment id out of a file name such as `00042.wal`.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Lists segment files in `path` without taking the directory lock.
///
/// Used by read-only tooling.
pub fn list_segment_files(path: &Path) -> WalResult<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(parse_segment_file_name) {
            segments.push((id, entry.path()));
        }
    }
    Ok(segments)
}

/// Returns the meta file path inside `path`.
#[must_use]
pub fn meta_file_path(path: &Path) -> PathBuf {
    path.join(META_FILE)
}
