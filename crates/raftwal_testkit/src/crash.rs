//! Crash recovery testing for raftwal.
//!
//! A crash is simulated by closing a log and then editing its files into a
//! state the writer can leave behind when the process dies mid-operation.
//! Reopening must expose exactly the durable prefix.
//!
//! ## Crash points
//!
//! 1. **Torn payload** - the slot index landed but the payload did not
//! 2. **Missing index** - payload and slot body written, index not yet
//! 3. **Truncated file** - the file lost its tail
//! 4. **Stale slots** - written slots past the logical end
//! 5. **Interrupted truncation** - only the highest slots were zeroed
//! 6. **Snapshot fields without blob** - meta fields updated, blob not
//! 7. **Snapshot before compaction** - snapshot stored, segments not trimmed
//! 8. **Overwrite before payload** - a rewritten slot landed over the old
//!    payload, its own payload did not
//! 9. **Interrupted discard** - snapshot installed, only some segments of
//!    the discarded log deleted
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raftwal_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use raftwal_core::{
    meta_file_path, segment_file_name, ConfState, DurableLog, HardState, MetaField, MetaStore,
    Slot, Snapshot, WalError, WalResult, FRAME_HEADER_SIZE, META_MIN_SIZE, SLOTS_PER_SEGMENT,
    SLOT_SIZE,
};
use raftwal_storage::MappedFile;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::fixtures::entries;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrashPoint {
    /// Crash after a slot index was written but before its payload landed.
    DuringPayloadWrite,
    /// Crash after the slot body was written but before its index.
    BeforeIndexWrite,
    /// Crash that cut the segment file short.
    FileTruncated,
    /// Crash that left written slots past the logical end.
    StaleSlots,
    /// Crash part way through zeroing a tail.
    DuringTruncation,
    /// Crash between the snapshot fields and the snapshot blob.
    BetweenSnapshotWrites,
    /// Crash after a snapshot was stored but before segments were deleted.
    BeforeCompaction,
    /// Crash after an overwriting slot landed but before its payload did.
    OverwriteBeforePayload,
    /// Crash part way through deleting the log under an installed snapshot.
    DuringDiscard,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone, Serialize)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Simulated crash.
    pub crash_point: CrashPoint,
    /// Description of what was tested.
    pub description: String,
    /// Last index expected after recovery.
    pub expected_last_index: u64,
    /// Last index seen after recovery.
    pub actual_last_index: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn pass(crash_point: CrashPoint, description: &str, last_index: u64) -> Self {
        Self {
            passed: true,
            crash_point,
            description: description.to_string(),
            expected_last_index: last_index,
            actual_last_index: last_index,
            error: None,
        }
    }

    fn fail(
        crash_point: CrashPoint,
        description: &str,
        expected: u64,
        actual: u64,
        error: &str,
    ) -> Self {
        Self {
            passed: false,
            crash_point,
            description: description.to_string(),
            expected_last_index: expected,
            actual_last_index: actual,
            error: Some(error.to_string()),
        }
    }
}

/// What a reopened log looked like.
#[derive(Debug, Clone, Copy)]
struct Recovered {
    last_index: u64,
    /// Whether every readable entry matched what was written.
    intact: bool,
}

/// Reads slot `pos` of a segment file.
pub fn read_slot(segment: &Path, pos: u64) -> WalResult<Option<Slot>> {
    let (file, _) = MappedFile::open(segment, 1)?;
    Slot::decode(file.read_at(Slot::position(pos), SLOT_SIZE as usize)?)
}

/// File offset of the payload frame of slot `pos`.
pub fn payload_offset(segment: &Path, pos: u64) -> WalResult<u64> {
    read_slot(segment, pos)?
        .map(|slot| slot.offset)
        .ok_or_else(|| WalError::invalid_operation(format!("slot {pos} is unwritten")))
}

/// Damages the checksum of the payload of slot `pos`.
pub fn tear_payload(segment: &Path, pos: u64) -> WalResult<()> {
    let offset = payload_offset(segment, pos)?;
    let (mut file, _) = MappedFile::open(segment, 1)?;
    let crc_at = offset + 4;
    let byte = file.read_at(crc_at, 1)?[0];
    file.write_at(crc_at, &[byte ^ 0xFF])?;
    file.sync()?;
    Ok(())
}

/// Reads the whole payload frame of slot `pos`, header included.
pub fn read_payload_frame(segment: &Path, pos: u64) -> WalResult<Vec<u8>> {
    let offset = payload_offset(segment, pos)?;
    let (file, _) = MappedFile::open(segment, 1)?;
    let len = u32::from_le_bytes(
        file.read_at(offset, 4)?
            .try_into()
            .map_err(|_| WalError::corruption("short frame header"))?,
    );
    Ok(file
        .read_at(offset, (FRAME_HEADER_SIZE + u64::from(len)) as usize)?
        .to_vec())
}

/// Writes `frame` at the payload offset of slot `pos`.
pub fn restore_payload_frame(segment: &Path, pos: u64, frame: &[u8]) -> WalResult<()> {
    let offset = payload_offset(segment, pos)?;
    let (mut file, _) = MappedFile::open(segment, 1)?;
    file.write_at(offset, frame)?;
    file.sync()?;
    Ok(())
}

/// Zeroes the index of slot `pos`, leaving the rest of the slot.
pub fn clear_index(segment: &Path, pos: u64) -> WalResult<()> {
    let (mut file, _) = MappedFile::open(segment, 1)?;
    file.write_u64(Slot::index_position(pos), 0)?;
    file.sync()?;
    Ok(())
}

/// Writes a slot claiming `index` at `pos`, pointing at no real payload.
pub fn write_stale_slot(segment: &Path, pos: u64, term: u64, index: u64) -> WalResult<()> {
    let slot = Slot {
        term,
        index,
        offset: 0,
        entry_type: Default::default(),
    };
    let (mut file, _) = MappedFile::open(segment, 1)?;
    file.write_at(Slot::position(pos), &slot.encode_body())?;
    file.write_u64(Slot::index_position(pos), index)?;
    file.sync()?;
    Ok(())
}

/// Cuts `path` to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> WalResult<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

/// Overwrites the snapshot index and term fields of a meta file.
pub fn write_snapshot_fields(meta: &Path, index: u64, term: u64) -> WalResult<()> {
    let (mut file, _) = MappedFile::open(meta, 1)?;
    file.write_u64(MetaField::SnapshotIndex.offset(), index)?;
    file.write_u64(MetaField::SnapshotTerm.offset(), term)?;
    file.sync()?;
    Ok(())
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Directory holding one data directory per scenario.
    pub root: PathBuf,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            results: Vec::new(),
        }
    }

    /// Creates a new harness with a temporary directory.
    pub fn with_temp_dir() -> std::io::Result<Self> {
        let unique_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let root = std::env::temp_dir()
            .join("raftwal_crash_test")
            .join(format!("test_{}_{}", std::process::id(), unique_id));
        std::fs::create_dir_all(&root)?;
        Ok(Self::new(root))
    }

    /// Cleans up the test directory.
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    /// Creates an empty data directory for one scenario.
    fn fresh_dir(&self, name: &str) -> WalResult<PathBuf> {
        let dir = self.root.join(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Writes entries `1..=count` in term 1 and closes the log.
    fn write_log(dir: &Path, count: u64) -> WalResult<()> {
        let log = DurableLog::open(dir)?;
        log.save(
            &HardState::new(1, 1, count),
            &entries(1..count + 1, 1),
            &Snapshot::default(),
        )?;
        log.sync()?;
        log.close()
    }

    /// Reopens `dir` and checks every readable entry against what
    /// `write_log` stored.
    fn recover(dir: &Path) -> WalResult<Recovered> {
        let log = DurableLog::open(dir)?;
        let first = log.first_index()?;
        let last = log.last_index()?;
        let intact = log.entries(first, last + 1, None)? == entries(first..last + 1, 1);
        log.close()?;
        Ok(Recovered {
            last_index: last,
            intact,
        })
    }

    fn record(
        &mut self,
        crash_point: CrashPoint,
        description: &str,
        expected: u64,
        outcome: WalResult<Recovered>,
    ) -> CrashRecoveryResult {
        let result = match outcome {
            Ok(r) if r.intact && r.last_index == expected => {
                CrashRecoveryResult::pass(crash_point, description, expected)
            }
            Ok(r) if !r.intact => CrashRecoveryResult::fail(
                crash_point,
                description,
                expected,
                r.last_index,
                "recovered entries differ from the written ones",
            ),
            Ok(r) => CrashRecoveryResult::fail(
                crash_point,
                description,
                expected,
                r.last_index,
                "wrong last index after recovery",
            ),
            Err(e) => {
                CrashRecoveryResult::fail(crash_point, description, expected, 0, &e.to_string())
            }
        };

        self.results.push(result.clone());
        result
    }

    /// Tests that a payload torn after its slot was indexed is trimmed.
    pub fn test_torn_payload(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("torn_payload")?;
            Self::write_log(&dir, 10)?;
            tear_payload(&dir.join(segment_file_name(1)), 9)?;
            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::DuringPayloadWrite,
            "Torn payload is trimmed",
            9,
            outcome,
        )
    }

    /// Tests that a slot whose index never landed is not exposed.
    pub fn test_missing_index(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("missing_index")?;
            Self::write_log(&dir, 10)?;
            clear_index(&dir.join(segment_file_name(1)), 9)?;
            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::BeforeIndexWrite,
            "Slot without index is not exposed",
            9,
            outcome,
        )
    }

    /// Tests that a segment cut inside the last payload recovers the
    /// entries before it.
    pub fn test_truncated_file(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("truncated_file")?;
            Self::write_log(&dir, 10)?;
            let segment = dir.join(segment_file_name(1));
            let cut = payload_offset(&segment, 9)? + FRAME_HEADER_SIZE / 2;
            truncate_file(&segment, cut)?;
            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::FileTruncated,
            "File cut mid-payload keeps the prefix",
            9,
            outcome,
        )
    }

    /// Tests that stale slots past the end are cleared and later appends
    /// are unaffected.
    pub fn test_stale_slots(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("stale_slots")?;
            Self::write_log(&dir, 10)?;
            let segment = dir.join(segment_file_name(1));
            write_stale_slot(&segment, 12, 1, 13)?;
            write_stale_slot(&segment, 20, 1, 21)?;

            let log = DurableLog::open(&dir)?;
            log.append(&entries(11..16, 1))?;
            log.sync()?;
            log.close()?;
            drop(log);

            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::StaleSlots,
            "Stale slots are cleared on open",
            15,
            outcome,
        )
    }

    /// Tests that a truncation cut short leaves a valid prefix.
    pub fn test_interrupted_truncation(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("interrupted_truncation")?;
            Self::write_log(&dir, 10)?;
            let segment = dir.join(segment_file_name(1));
            // Overwrite from index 4 died after zeroing the top three indices.
            for pos in (7..10).rev() {
                clear_index(&segment, pos)?;
            }
            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::DuringTruncation,
            "Interrupted truncation keeps a prefix",
            7,
            outcome,
        )
    }

    /// Tests that snapshot fields written without their blob are rewritten
    /// from the blob.
    pub fn test_snapshot_fields_without_blob(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("snapshot_fields")?;
            Self::write_log(&dir, 10)?;
            {
                let log = DurableLog::open(&dir)?;
                log.create_snapshot(4, ConfState::with_voters([1]), b"four".to_vec())?;
                log.close()?;
            }
            write_snapshot_fields(&meta_file_path(&dir), 8, 3)?;

            let log = DurableLog::open(&dir)?;
            let snapshot = log.snapshot()?;
            let first = log.first_index()?;
            let term = log.term(4)?;
            log.close()?;
            drop(log);

            let mut recovered = Self::recover(&dir)?;
            recovered.intact &= snapshot.metadata.index == 4 && first == 5 && term == 1;
            Ok(recovered)
        })();
        self.record(
            CrashPoint::BetweenSnapshotWrites,
            "Snapshot fields follow the snapshot blob",
            10,
            outcome,
        )
    }

    /// Tests that a stored snapshot hides the entries it covers even when
    /// their segments were not deleted.
    pub fn test_snapshot_before_compaction(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("snapshot_before_compaction")?;
            Self::write_log(&dir, 10)?;
            {
                let mut meta = MetaStore::open(&meta_file_path(&dir), META_MIN_SIZE)?;
                let snapshot = Snapshot::new(6, 1, ConfState::with_voters([1]), b"six".to_vec());
                meta.store_snapshot(&snapshot)?;
                meta.sync()?;
            }

            let log = DurableLog::open(&dir)?;
            let first = log.first_index()?;
            let compacted = matches!(log.entries(6, 7, None), Err(WalError::Compacted));
            log.close()?;
            drop(log);

            let mut recovered = Self::recover(&dir)?;
            recovered.intact &= first == 7 && compacted;
            Ok(recovered)
        })();
        self.record(
            CrashPoint::BeforeCompaction,
            "Snapshot without compaction hides covered entries",
            10,
            outcome,
        )
    }

    /// Tests that an entry rewritten at the same offset with a payload of
    /// the same length does not adopt the payload it replaced.
    pub fn test_overwrite_before_payload(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("overwrite_before_payload")?;
            Self::write_log(&dir, 10)?;
            let segment = dir.join(segment_file_name(1));
            let old_frame = read_payload_frame(&segment, 9)?;
            {
                let log = DurableLog::open(&dir)?;
                log.append(&entries(10..11, 2))?;
                log.sync()?;
                log.close()?;
            }
            // The new slot is on disk, its payload page is not.
            restore_payload_frame(&segment, 9, &old_frame)?;
            Self::recover(&dir)
        })();
        self.record(
            CrashPoint::OverwriteBeforePayload,
            "Rewritten slot does not adopt the old payload",
            9,
            outcome,
        )
    }

    /// Tests that the segments left by a snapshot install that died while
    /// deleting the log are removed on open.
    pub fn test_interrupted_discard(&mut self) -> CrashRecoveryResult {
        let outcome = (|| -> WalResult<Recovered> {
            let dir = self.fresh_dir("interrupted_discard")?;
            Self::write_log(&dir, SLOTS_PER_SEGMENT + 10)?;
            {
                let mut meta = MetaStore::open(&meta_file_path(&dir), META_MIN_SIZE)?;
                let snapshot =
                    Snapshot::new(100, 5, ConfState::with_voters([1]), b"installed".to_vec());
                meta.store_snapshot(&snapshot)?;
                meta.sync()?;
            }
            std::fs::remove_file(dir.join(segment_file_name(1)))?;

            let log = DurableLog::open(&dir)?;
            let segments = log.segments()?.len();
            let first = log.first_index()?;
            let term = log.term(100)?;
            log.close()?;
            drop(log);

            let mut recovered = Self::recover(&dir)?;
            recovered.intact &= segments == 0 && first == 101 && term == 5;
            Ok(recovered)
        })();
        self.record(
            CrashPoint::DuringDiscard,
            "Interrupted discard leaves only the snapshot",
            100,
            outcome,
        )
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_torn_payload();
        self.test_missing_index();
        self.test_truncated_file();
        self.test_stale_slots();
        self.test_interrupted_truncation();
        self.test_snapshot_fields_without_blob();
        self.test_snapshot_before_compaction();
        self.test_overwrite_before_payload();
        self.test_interrupted_discard();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {}/{}\n\n",
            passed, total
        );

        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!(
                "{} {} ({:?})\n  Expected last index: {}, Actual: {}\n",
                status,
                result.description,
                result.crash_point,
                result.expected_last_index,
                result.actual_last_index
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {}\n", error));
            }
        }

        summary
    }

    /// Returns the results as JSON.
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.results)
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
