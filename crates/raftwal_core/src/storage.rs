//! The read side of the consensus storage contract.

use crate::error::WalResult;
use crate::types::{Entry, RaftState, Snapshot};

/// Storage a Raft engine reads its log and state from.
///
/// Implementations must be safe to call from several threads while another
/// thread is writing.
///
/// # Errors
///
/// Methods that take an index fail with `Compacted` when the index lies
/// below the snapshot and `Unavailable` when it has not been written yet.
pub trait RaftStorage: Send + Sync {
    /// Returns the hard state and the membership of the last snapshot.
    fn initial_state(&self) -> WalResult<RaftState>;

    /// Returns the entries in `[lo, hi)`, limited to about `max_size`
    /// payload bytes but never fewer than one entry.
    fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> WalResult<Vec<Entry>>;

    /// Returns the term of the entry at `index`.
    fn term(&self, index: u64) -> WalResult<u64>;

    /// Returns the first index that can still be read.
    fn first_index(&self) -> WalResult<u64>;

    /// Returns the last index written.
    fn last_index(&self) -> WalResult<u64>;

    /// Returns the most recent snapshot.
    fn snapshot(&self) -> WalResult<Snapshot>;
}
