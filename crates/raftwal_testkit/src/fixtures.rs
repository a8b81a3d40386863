//! Test fixtures and log helpers.
//!
//! Provides convenience functions for setting up temporary logs
//! and common starting states.

use raftwal_core::{meta_file_path, segment_file_name, Config, DurableLog, Entry};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A durable log in a temporary directory.
pub struct TestLog {
    /// The log instance.
    pub log: DurableLog,
    config: Config,
    /// Kept alive so the directory outlives the log.
    temp_dir: TempDir,
}

impl TestLog {
    /// Creates an empty log with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty log with `config`.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log = DurableLog::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open log");
        Self {
            log,
            config,
            temp_dir,
        }
    }

    /// Returns the data directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the path of the meta file.
    pub fn meta_path(&self) -> PathBuf {
        meta_file_path(self.path())
    }

    /// Returns the path of segment `id`.
    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.path().join(segment_file_name(id))
    }

    /// Closes the log so its files can be edited.
    pub fn close(&self) {
        self.log.close().expect("Failed to close log");
    }

    /// Closes and opens the log again from its files.
    pub fn reopen(&mut self) {
        self.close();
        self.log = DurableLog::open_with_config(self.temp_dir.path(), self.config.clone())
            .expect("Failed to reopen log");
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLog {
    type Target = DurableLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

/// Payload stored for `index` written in `term`.
pub fn payload_for(index: u64, term: u64) -> Vec<u8> {
    format!("entry-{index}-{term}").into_bytes()
}

/// Normal entries for `range`, all in `term`.
pub fn entries(range: Range<u64>, term: u64) -> Vec<Entry> {
    range
        .map(|index| Entry::new(term, index, payload_for(index, term)))
        .collect()
}

/// Runs a test with a temporary log.
///
/// # Example
///
/// ```rust,ignore
/// use raftwal_testkit::with_temp_log;
///
/// #[test]
/// fn my_test() {
///     with_temp_log(|log| {
///         assert_eq!(log.first_index().unwrap(), 1);
///     });
/// }
/// ```
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&DurableLog) -> R,
{
    let test_log = TestLog::new();
    f(&test_log.log)
}

/// Runs a test with a temporary log and its directory.
pub fn with_temp_log_dir<F, R>(f: F) -> R
where
    F: FnOnce(&DurableLog, &Path) -> R,
{
    let test_log = TestLog::new();
    f(&test_log.log, test_log.path())
}

/// Common starting states.
pub mod scenarios {
    use super::*;
    use raftwal_core::{ConfState, HardState};

    /// A log holding entries `1..=count` in term 1, committed through
    /// `count`.
    pub fn populated_log(count: u64) -> TestLog {
        let test_log = TestLog::new();
        test_log
            .save(
                &HardState::new(1, 1, count),
                &entries(1..count + 1, 1),
                &Default::default(),
            )
            .expect("Failed to save entries");
        test_log.sync().expect("Failed to sync");
        test_log
    }

    /// A populated log compacted by a snapshot at `snapshot_index`.
    pub fn compacted_log(count: u64, snapshot_index: u64) -> TestLog {
        let test_log = populated_log(count);
        test_log
            .create_snapshot(
                snapshot_index,
                ConfState::with_voters([1, 2, 3]),
                b"snapshot".to_vec(),
            )
            .expect("Failed to create snapshot");
        test_log
    }
}
