//! Property-based test generators using proptest.
//!
//! Provides strategies for random log operations plus [`ModelLog`], an
//! in-memory reference the durable log is compared against.

use proptest::prelude::*;
use raftwal_core::{ConfState, Entry, EntryType, HardState, WalError, WalResult};

/// Strategy for generating entry payloads.
pub fn entry_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating entry types.
pub fn entry_type_strategy() -> impl Strategy<Value = EntryType> {
    prop_oneof![
        8 => Just(EntryType::Normal),
        1 => Just(EntryType::ConfChange),
        1 => Just(EntryType::ConfChangeV2),
    ]
}

/// Strategy for generating hard states, including the empty one.
pub fn hard_state_strategy() -> impl Strategy<Value = HardState> {
    (0u64..100, 0u64..8, 0u64..1000).prop_map(|(term, vote, commit)| HardState::new(term, vote, commit))
}

/// Strategy for generating memberships.
pub fn conf_state_strategy() -> impl Strategy<Value = ConfState> {
    (
        prop::collection::vec(1u64..16, 1..5),
        prop::collection::vec(16u64..32, 0..3),
    )
        .prop_map(|(voters, learners)| ConfState {
            voters,
            learners,
            ..ConfState::default()
        })
}

/// Strategy for a batch of consecutive entries starting at `start`.
pub fn batch_strategy(start: u64, term: u64, max_len: usize) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec((entry_type_strategy(), entry_data_strategy()), 1..=max_len).prop_map(
        move |items| {
            items
                .into_iter()
                .zip(start..)
                .map(|((entry_type, data), index)| {
                    Entry::new(term, index, data).with_type(entry_type)
                })
                .collect()
        },
    )
}

/// A step applied to both the durable log and the model.
#[derive(Debug, Clone)]
pub enum LogOperation {
    /// Append `count` entries starting `back` positions before the end,
    /// overwriting what they overlap, in a term raised by `term_bump`.
    Append {
        /// How far before `last_index + 1` the batch starts.
        back: u64,
        /// Number of entries.
        count: u64,
        /// Added to the highest term seen so far.
        term_bump: u64,
        /// Byte the payloads are filled with.
        fill: u8,
    },
    /// Take a snapshot `back` positions before the last index.
    Snapshot {
        /// Distance from the last index.
        back: u64,
    },
    /// Store a hard state.
    SetHardState(HardState),
    /// Close and open the log again.
    Reopen,
}

/// Strategy for generating a single operation.
pub fn operation_strategy() -> impl Strategy<Value = LogOperation> {
    prop_oneof![
        6 => (0u64..6, 1u64..12, 0u64..2, any::<u8>()).prop_map(|(back, count, term_bump, fill)| {
            LogOperation::Append {
                back,
                count,
                term_bump,
                fill,
            }
        }),
        1 => (0u64..8).prop_map(|back| LogOperation::Snapshot { back }),
        1 => hard_state_strategy().prop_map(LogOperation::SetHardState),
        1 => Just(LogOperation::Reopen),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(max_ops: usize) -> impl Strategy<Value = Vec<LogOperation>> {
    prop::collection::vec(operation_strategy(), 1..=max_ops)
}

/// In-memory reference for the observable behaviour of a durable log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelLog {
    floor: u64,
    floor_term: u64,
    entries: Vec<Entry>,
    hard_state: HardState,
    max_term: u64,
}

impl ModelLog {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot index.
    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// First readable index.
    pub fn first_index(&self) -> u64 {
        self.floor + 1
    }

    /// Last stored index.
    pub fn last_index(&self) -> u64 {
        self.floor + self.entries.len() as u64
    }

    /// Stored hard state.
    pub fn hard_state(&self) -> HardState {
        self.hard_state
    }

    /// Term of `index`, with the same errors as the durable log.
    pub fn term(&self, index: u64) -> WalResult<u64> {
        if index == self.floor {
            return Ok(self.floor_term);
        }
        if index < self.floor {
            return Err(WalError::Compacted);
        }
        self.entry(index)
            .map(|e| e.term)
            .ok_or(WalError::Unavailable)
    }

    /// Entries in `[lo, hi)`.
    pub fn entries(&self, lo: u64, hi: u64) -> WalResult<Vec<Entry>> {
        if lo < self.first_index() {
            return Err(WalError::Compacted);
        }
        if hi > self.last_index() + 1 {
            return Err(WalError::Unavailable);
        }
        let start = (lo - self.first_index()) as usize;
        let end = (hi.max(lo) - self.first_index()) as usize;
        Ok(self.entries[start..end].to_vec())
    }

    /// Turns an [`LogOperation::Append`] into the batch it writes.
    pub fn batch(&self, back: u64, count: u64, term_bump: u64, fill: u8) -> Vec<Entry> {
        let start = (self.last_index() + 1)
            .saturating_sub(back)
            .max(self.first_index());
        let term = (self.max_term + term_bump).max(1);
        (start..start + count)
            .map(|index| Entry::new(term, index, vec![fill; (index % 17) as usize]))
            .collect()
    }

    /// Appends `batch`, dropping what lies at or below the floor and
    /// replacing any overlap.
    pub fn append(&mut self, batch: &[Entry]) {
        let rest: Vec<&Entry> = batch.iter().filter(|e| e.index > self.floor).collect();
        let Some(head) = rest.first() else {
            return;
        };
        let keep = (head.index - self.first_index()) as usize;
        self.entries.truncate(keep);
        for entry in rest {
            self.max_term = self.max_term.max(entry.term);
            self.entries.push(entry.clone());
        }
    }

    /// Index a [`LogOperation::Snapshot`] targets.
    pub fn snapshot_target(&self, back: u64) -> u64 {
        self.last_index().saturating_sub(back)
    }

    /// Compacts through `index`, with the same errors as
    /// `create_snapshot`.
    pub fn compact(&mut self, index: u64) -> WalResult<()> {
        if index < self.first_index() {
            return Err(WalError::SnapshotOutOfDate);
        }
        if index > self.last_index() {
            return Err(WalError::Unavailable);
        }
        self.floor_term = self.term(index)?;
        let drop = (index - self.floor) as usize;
        self.entries.drain(..drop);
        self.floor = index;
        Ok(())
    }

    /// Stores `hs` unless it is empty.
    pub fn set_hard_state(&mut self, hs: HardState) {
        if !hs.is_empty() {
            self.hard_state = hs;
        }
    }

    fn entry(&self, index: u64) -> Option<&Entry> {
        let offset = index.checked_sub(self.first_index())?;
        self.entries.get(offset as usize)
    }
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
