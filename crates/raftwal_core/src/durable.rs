//! The durable log a Raft engine persists into.
//!
//! [`DurableLog`] puts the [`MetaStore`] and the [`LogSet`] of one data
//! directory behind a single mutex, so no caller ever sees a snapshot that
//! disagrees with the log next to it.
//!
//! ## Write ordering
//!
//! `save` appends entries, then stores the hard state, then installs the
//! snapshot. A crash therefore never leaves a durable vote or commit index
//! that refers to entries which were not written. Snapshots are synced
//! before any segment they cover is deleted.
//!
//! ## Failure
//!
//! Corruption and failed mapping growth are fatal. The first fatal error is
//! logged and poisons the log: every later call returns
//! [`WalError::Poisoned`] and the embedding process decides how to stop.

use crate::config::Config;
use crate::dir::DataDir;
use crate::error::{WalError, WalResult};
use crate::log_set::LogSet;
use crate::meta::{MetaField, MetaStore};
use crate::stats::{LogStats, SegmentInfo, WalCounters};
use crate::storage::RaftStorage;
use crate::types::{ConfState, Entry, HardState, RaftState, Snapshot};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// A crash-consistent Raft log and state store backed by one directory.
///
/// # Example
///
/// ```rust,ignore
/// use raftwal_core::{DurableLog, Entry, HardState, Snapshot};
///
/// let log = DurableLog::open(Path::new("raft"))?;
/// log.save(
///     &HardState::new(1, 1, 0),
///     &[Entry::new(1, 1, b"a".to_vec())],
///     &Snapshot::default(),
/// )?;
/// log.sync()?;
/// ```
pub struct DurableLog {
    path: PathBuf,
    config: Config,
    state: Mutex<State>,
    counters: WalCounters,
}

enum State {
    Open(Box<Stores>),
    Poisoned,
    Closed,
}

struct Stores {
    /// Held for the directory lock.
    _dir: DataDir,
    meta: MetaStore,
    log: LogSet,
}

impl DurableLog {
    /// Opens the log in `path` with default configuration.
    pub fn open(path: &Path) -> WalResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the log in `path`.
    ///
    /// Takes the directory lock, opens or creates the meta file and loads
    /// every segment, recovering torn tails. Segments left behind by a log
    /// discard that did not finish are deleted.
    ///
    /// # Errors
    ///
    /// `DirectoryLocked` if another process holds the directory, and
    /// `Corruption` if the files on disk are inconsistent.
    pub fn open_with_config(path: &Path, config: Config) -> WalResult<Self> {
        let dir = DataDir::open(path, config.create_if_missing)?;
        let meta = MetaStore::open(&dir.meta_path(), config.meta_initial_size)?;
        let log = LogSet::load(&dir, config.segment_initial_size)?;
        dir.sync()?;

        let mut stores = Stores {
            _dir: dir,
            meta,
            log,
        };
        stores.reconcile_log()?;

        info!(
            path = %path.display(),
            first = stores.first_index()?,
            last = stores.last_index()?,
            snapshot = stores.meta.snapshot_index()?,
            segments = stores.log.segments().len(),
            "opened log"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            state: Mutex::new(State::Open(Box::new(stores))),
            counters: WalCounters::new(),
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true until the log is closed or poisoned.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), State::Open(_))
    }

    /// Returns true if a fatal error stopped the log.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        matches!(*self.state.lock(), State::Poisoned)
    }

    /// Runs `f` under the lock, poisoning the log on a fatal error.
    fn with_stores<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Stores) -> WalResult<T>,
    ) -> WalResult<T> {
        let mut state = self.state.lock();
        let stores = match &mut *state {
            State::Open(stores) => &mut **stores,
            State::Poisoned => return Err(WalError::Poisoned),
            State::Closed => return Err(WalError::Closed),
        };

        match f(stores) {
            Err(e) if e.is_fatal() => {
                error!(op, error = %e, path = %self.path.display(), "fatal log error, log poisoned");
                *state = State::Poisoned;
                Err(e)
            }
            result => result,
        }
    }

    /// Returns the stored hard state and the membership of the last snapshot.
    pub fn initial_state(&self) -> WalResult<RaftState> {
        self.with_stores("initial_state", |s| {
            Ok(RaftState {
                hard_state: s.meta.hard_state()?,
                conf_state: s.meta.snapshot()?.metadata.conf_state,
            })
        })
    }

    /// Returns the term of the entry at `index`.
    ///
    /// The snapshot index answers with the snapshot term; anything below it
    /// is `Compacted`.
    pub fn term(&self, index: u64) -> WalResult<u64> {
        self.with_stores("term", |s| s.term(index))
    }

    /// Returns the entries in `[lo, hi)`, at least one and otherwise no more
    /// than `max_size` payload bytes.
    ///
    /// # Errors
    ///
    /// `Compacted` if `lo < first_index()`, `Unavailable` if
    /// `hi > last_index() + 1`.
    pub fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> WalResult<Vec<Entry>> {
        self.with_stores("entries", |s| {
            let entries = s.entries(lo, hi, max_size)?;
            let bytes = entries.iter().map(Entry::size).sum();
            self.counters.record_read(entries.len() as u64, bytes);
            Ok(entries)
        })
    }

    /// First readable index: one past the snapshot, else the oldest stored
    /// entry, else 1.
    pub fn first_index(&self) -> WalResult<u64> {
        self.with_stores("first_index", |s| s.first_index())
    }

    /// Last index covered by the log or the snapshot.
    pub fn last_index(&self) -> WalResult<u64> {
        self.with_stores("last_index", |s| s.last_index())
    }

    /// Returns the stored snapshot, empty if none was taken.
    pub fn snapshot(&self) -> WalResult<Snapshot> {
        self.with_stores("snapshot", |s| s.meta.snapshot())
    }

    /// Takes a snapshot at `index` and compacts the segments it covers.
    ///
    /// The snapshot is synced before any segment is deleted.
    ///
    /// # Errors
    ///
    /// `SnapshotOutOfDate` if `index < first_index()`, `Unavailable` if
    /// `index` has not been written.
    pub fn create_snapshot(
        &self,
        index: u64,
        conf_state: ConfState,
        data: Vec<u8>,
    ) -> WalResult<Snapshot> {
        self.with_stores("create_snapshot", |s| {
            if index < s.first_index()? {
                return Err(WalError::SnapshotOutOfDate);
            }
            if index > s.last_index()? {
                return Err(WalError::Unavailable);
            }

            let term = s.term(index)?;
            let snapshot = Snapshot::new(index, term, conf_state, data);
            s.meta.store_snapshot(&snapshot)?;
            s.meta.sync()?;
            let deleted = s.log.delete_before(index)?;

            self.counters.record_snapshot_created();
            self.counters.record_compaction(deleted as u64);
            info!(index, term, deleted, "created snapshot");
            Ok(snapshot)
        })
    }

    /// Persists one round of consensus output: entries, then the hard state,
    /// then the snapshot.
    ///
    /// When the entries only connect to the log through the snapshot carried
    /// in the same call, the snapshot is installed first. A snapshot that is
    /// not newer than the stored one is ignored. Nothing is synced unless
    /// the log was opened with `sync_on_save`.
    pub fn save(&self, hs: &HardState, entries: &[Entry], snapshot: &Snapshot) -> WalResult<()> {
        self.with_stores("save", |s| {
            let mut pending = !snapshot.is_empty();
            if pending && s.connects_through(entries, snapshot)? {
                self.install(s, snapshot)?;
                pending = false;
            }

            let appended = s.append(entries)?;
            s.meta.store_hard_state(hs)?;

            if pending {
                match self.install(s, snapshot) {
                    Err(WalError::SnapshotOutOfDate) => {
                        debug!(index = snapshot.metadata.index, "ignoring stale snapshot in save");
                    }
                    result => result?,
                }
            }

            if self.config.sync_on_save {
                s.sync()?;
                self.counters.record_sync();
            }

            self.counters.record_save();
            self.counters.record_append(
                appended.len() as u64,
                appended.iter().map(Entry::size).sum(),
            );
            Ok(())
        })
    }

    /// Appends entries, replacing any stored entries from the first new
    /// index onward. Entries at or below the snapshot index are skipped.
    pub fn append(&self, entries: &[Entry]) -> WalResult<()> {
        self.with_stores("append", |s| {
            let appended = s.append(entries)?;
            self.counters.record_append(
                appended.len() as u64,
                appended.iter().map(Entry::size).sum(),
            );
            Ok(())
        })
    }

    /// Stores the hard state. An empty hard state is ignored.
    pub fn set_hard_state(&self, hs: &HardState) -> WalResult<()> {
        self.with_stores("set_hard_state", |s| s.meta.store_hard_state(hs))
    }

    /// Installs a snapshot received from the leader.
    ///
    /// The snapshot is synced first. The log is kept from the snapshot index
    /// onward if it holds that index with the snapshot's term, otherwise the
    /// whole log is discarded.
    ///
    /// # Errors
    ///
    /// `SnapshotOutOfDate` if the snapshot is not newer than the stored one.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> WalResult<()> {
        self.with_stores("apply_snapshot", |s| self.install(s, snapshot))
    }

    fn install(&self, s: &mut Stores, snapshot: &Snapshot) -> WalResult<()> {
        let deleted = s.install_snapshot(snapshot)?;
        self.counters.record_snapshot_applied();
        self.counters.record_compaction(deleted as u64);
        info!(
            index = snapshot.metadata.index,
            term = snapshot.metadata.term,
            deleted,
            "applied snapshot"
        );
        Ok(())
    }

    /// Returns the node id.
    pub fn node_id(&self) -> WalResult<u64> {
        self.with_stores("node_id", |s| s.meta.get_uint(MetaField::NodeId))
    }

    /// Sets the node id.
    pub fn set_node_id(&self, id: u64) -> WalResult<()> {
        self.with_stores("set_node_id", |s| s.meta.set_uint(MetaField::NodeId, id))
    }

    /// Returns the cluster id.
    pub fn cluster_id(&self) -> WalResult<u64> {
        self.with_stores("cluster_id", |s| s.meta.get_uint(MetaField::ClusterId))
    }

    /// Sets the cluster id.
    pub fn set_cluster_id(&self, id: u64) -> WalResult<()> {
        self.with_stores("set_cluster_id", |s| s.meta.set_uint(MetaField::ClusterId, id))
    }

    /// Returns the applied-index checkpoint.
    pub fn checkpoint(&self) -> WalResult<u64> {
        self.with_stores("checkpoint", |s| s.meta.get_uint(MetaField::CheckpointIndex))
    }

    /// Records the highest index the application has durably applied.
    pub fn set_checkpoint(&self, index: u64) -> WalResult<()> {
        self.with_stores("set_checkpoint", |s| {
            s.meta.set_uint(MetaField::CheckpointIndex, index)
        })
    }

    /// Returns the shape of the log and its counters.
    pub fn stats(&self) -> WalResult<LogStats> {
        self.with_stores("stats", |s| {
            Ok(LogStats {
                first_index: s.first_index()?,
                last_index: s.last_index()?,
                snapshot_index: s.meta.snapshot_index()?,
                snapshot_term: s.meta.snapshot_term()?,
                segment_count: s.log.segments().len(),
                segment_bytes: s.log.file_bytes(),
                payload_bytes: s.log.payload_bytes(),
                meta_bytes: s.meta.len(),
                counters: self.counters.snapshot(),
            })
        })
    }

    /// Describes every segment, oldest first.
    pub fn segments(&self) -> WalResult<Vec<SegmentInfo>> {
        self.with_stores("segments", |s| {
            Ok(s.log
                .segments()
                .iter()
                .map(|segment| SegmentInfo {
                    id: segment.id(),
                    first_index: segment.first_index(),
                    last_index: segment.last_index(),
                    slots_used: segment.len(),
                    file_bytes: segment.file_len(),
                })
                .collect())
        })
    }

    /// Flushes the meta file and every segment written since the last sync.
    ///
    /// Must return before anything that implies durability is acknowledged.
    pub fn sync(&self) -> WalResult<()> {
        self.with_stores("sync", |s| {
            s.sync()?;
            self.counters.record_sync();
            Ok(())
        })
    }

    /// Syncs and releases every mapping and the directory lock.
    ///
    /// Later calls return `Closed`. Closing twice is fine.
    pub fn close(&self) -> WalResult<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Closed) {
            State::Open(mut stores) => {
                let result = stores.sync();
                drop(stores);
                info!(path = %self.path.display(), "closed log");
                result
            }
            State::Poisoned => {
                *state = State::Poisoned;
                Err(WalError::Poisoned)
            }
            State::Closed => Ok(()),
        }
    }
}

impl Stores {
    /// Finishes an interrupted discard, then checks that the snapshot
    /// reaches the log.
    fn reconcile_log(&mut self) -> WalResult<()> {
        let snapshot_index = self.meta.snapshot_index()?;
        let (Some(first), Some(last)) = (self.log.first_index(), self.log.last_index()) else {
            return Ok(());
        };

        if snapshot_index > 0 && self.is_discard_remnant(snapshot_index, first, last)? {
            warn!(
                snapshot = snapshot_index,
                first, last, "deleting segments of an interrupted log discard"
            );
            self.log.discard_all()?;
            return Ok(());
        }

        if first > snapshot_index + 1 {
            return Err(WalError::corruption(format!(
                "log starts at {first} but the snapshot only covers up to {snapshot_index}"
            )));
        }
        Ok(())
    }

    /// True when the stored segments cannot continue the stored snapshot.
    ///
    /// Compaction keeps the segment holding the snapshot index and a
    /// discard deletes every segment, so a log that skips past the
    /// snapshot, ends below it, or disagrees with its term is what a crash
    /// during a discard leaves.
    fn is_discard_remnant(&self, snapshot_index: u64, first: u64, last: u64) -> WalResult<bool> {
        if first > snapshot_index + 1 || last < snapshot_index {
            return Ok(true);
        }
        if first > snapshot_index {
            return Ok(false);
        }
        Ok(self.log.term(snapshot_index)? != self.meta.snapshot_term()?)
    }

    fn first_index(&self) -> WalResult<u64> {
        let snapshot_index = self.meta.snapshot_index()?;
        if snapshot_index > 0 {
            return Ok(snapshot_index + 1);
        }
        Ok(self.log.first_index().unwrap_or(1))
    }

    fn last_index(&self) -> WalResult<u64> {
        let snapshot_index = self.meta.snapshot_index()?;
        Ok(self.log.last_index().unwrap_or(0).max(snapshot_index))
    }

    fn term(&self, index: u64) -> WalResult<u64> {
        let snapshot_index = self.meta.snapshot_index()?;
        if index == snapshot_index {
            return self.meta.snapshot_term();
        }
        if index < snapshot_index {
            return Err(WalError::Compacted);
        }
        self.log.term(index)
    }

    fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> WalResult<Vec<Entry>> {
        if lo < self.first_index()? {
            return Err(WalError::Compacted);
        }
        if hi > self.last_index()? + 1 {
            return Err(WalError::Unavailable);
        }
        self.log.entries(lo, hi, max_size)
    }

    /// Appends what lies above the snapshot and returns it.
    fn append<'a>(&mut self, entries: &'a [Entry]) -> WalResult<&'a [Entry]> {
        let floor = self.meta.snapshot_index()?;
        let skip = entries.iter().take_while(|e| e.index <= floor).count();
        let rest = &entries[skip..];
        let Some(head) = rest.first() else {
            return Ok(rest);
        };

        if self.log.is_empty() && head.index != floor + 1 {
            return Err(WalError::invalid_operation(format!(
                "append at {} leaves a gap after {floor}",
                head.index
            )));
        }
        self.log.add_entries(rest)?;
        Ok(rest)
    }

    /// True when `entries` start past the log and only follow on from
    /// `snapshot`.
    fn connects_through(&self, entries: &[Entry], snapshot: &Snapshot) -> WalResult<bool> {
        let Some(head) = entries.first() else {
            return Ok(false);
        };
        let last = self.last_index()?;
        Ok(head.index > last + 1 && snapshot.metadata.index + 1 >= head.index)
    }

    /// Stores and syncs `snapshot`, then trims or discards the log. Returns
    /// the number of segments deleted.
    fn install_snapshot(&mut self, snapshot: &Snapshot) -> WalResult<usize> {
        let current = self.meta.snapshot_index()?;
        let index = snapshot.metadata.index;
        if snapshot.is_empty() || index <= current {
            return Err(WalError::SnapshotOutOfDate);
        }

        self.meta.store_snapshot(snapshot)?;
        self.meta.sync()?;

        let keep_tail = match self.log.term(index) {
            Ok(term) => term == snapshot.metadata.term,
            Err(WalError::Compacted | WalError::Unavailable) => false,
            Err(e) => return Err(e),
        };
        if keep_tail {
            self.log.delete_before(index)
        } else {
            let count = self.log.segments().len();
            self.log.discard_all()?;
            Ok(count)
        }
    }

    fn sync(&mut self) -> WalResult<()> {
        self.meta.sync()?;
        self.log.sync()
    }
}

impl RaftStorage for DurableLog {
    fn initial_state(&self) -> WalResult<RaftState> {
        DurableLog::initial_state(self)
    }

    fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> WalResult<Vec<Entry>> {
        DurableLog::entries(self, lo, hi, max_size)
    }

    fn term(&self, index: u64) -> WalResult<u64> {
        DurableLog::term(self, index)
    }

    fn first_index(&self) -> WalResult<u64> {
        DurableLog::first_index(self)
    }

    fn last_index(&self) -> WalResult<u64> {
        DurableLog::last_index(self)
    }

    fn snapshot(&self) -> WalResult<Snapshot> {
        DurableLog::snapshot(self)
    }
}

impl std::fmt::Debug for DurableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableLog")
            .field("path", &self.path)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for DurableLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
