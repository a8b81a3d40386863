//! Consensus value types exchanged with the Raft engine.
//!
//! These mirror the shapes a Raft library hands to its storage layer. The
//! log never interprets entry payloads or snapshot data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u64)]
pub enum EntryType {
    /// A normal application command.
    #[default]
    Normal = 0,
    /// A single-step membership change.
    ConfChange = 1,
    /// A joint-consensus membership change.
    ConfChangeV2 = 2,
}

impl EntryType {
    /// Converts the on-disk tag to an entry type.
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::Normal),
            1 => Some(Self::ConfChange),
            2 => Some(Self::ConfChangeV2),
            _ => None,
        }
    }

    /// Returns the on-disk tag.
    #[must_use]
    pub const fn as_tag(self) -> u64 {
        self as u64
    }
}

/// A single replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Term in which the entry was proposed.
    pub term: u64,
    /// Position in the log, starting at 1.
    pub index: u64,
    /// Kind of entry.
    pub entry_type: EntryType,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl Entry {
    /// Creates a normal entry.
    pub fn new(term: u64, index: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            index,
            entry_type: EntryType::Normal,
            data: data.into(),
        }
    }

    /// Sets the entry type.
    #[must_use]
    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    /// Size counted against an `entries` byte budget.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {:?} ({} bytes)",
            self.index,
            self.term,
            self.entry_type,
            self.data.len()
        )
    }
}

/// The durable Raft state: current term, vote and commit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    /// Current term.
    pub term: u64,
    /// Node voted for in the current term (0 for none).
    pub vote: u64,
    /// Highest index known committed.
    pub commit: u64,
}

impl HardState {
    /// Creates a hard state.
    #[must_use]
    pub const fn new(term: u64, vote: u64, commit: u64) -> Self {
        Self { term, vote, commit }
    }

    /// Returns true for the uninitialised hard state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Cluster membership captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfState {
    /// Voting members.
    pub voters: Vec<u64>,
    /// Non-voting members.
    pub learners: Vec<u64>,
    /// Voters of the outgoing configuration during a joint change.
    pub voters_outgoing: Vec<u64>,
    /// Learners to add once the joint change leaves.
    pub learners_next: Vec<u64>,
    /// Whether the joint configuration is left automatically.
    pub auto_leave: bool,
}

impl ConfState {
    /// Creates a configuration with the given voters.
    pub fn with_voters(voters: impl Into<Vec<u64>>) -> Self {
        Self {
            voters: voters.into(),
            ..Self::default()
        }
    }
}

/// Index, term and membership covered by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Membership at `index`.
    pub conf_state: ConfState,
    /// Last index covered.
    pub index: u64,
    /// Term of the entry at `index`.
    pub term: u64,
}

/// A point-in-time snapshot of the replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Position and membership covered.
    pub metadata: SnapshotMetadata,
    /// Opaque state machine data.
    pub data: Vec<u8>,
}

impl Snapshot {
    /// Creates a snapshot.
    pub fn new(index: u64, term: u64, conf_state: ConfState, data: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata: SnapshotMetadata {
                conf_state,
                index,
                term,
            },
            data: data.into(),
        }
    }

    /// Returns true when no snapshot has been taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }
}

/// State the consensus engine restores on startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RaftState {
    /// Last persisted hard state.
    pub hard_state: HardState,
    /// Membership from the last snapshot.
    pub conf_state: ConfState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_tags() {
        for ty in [EntryType::Normal, EntryType::ConfChange, EntryType::ConfChangeV2] {
            assert_eq!(EntryType::from_tag(ty.as_tag()), Some(ty));
        }
        assert_eq!(EntryType::from_tag(7), None);
    }

    #[test]
    fn empty_values() {
        assert!(HardState::default().is_empty());
        assert!(!HardState::new(1, 0, 0).is_empty());
        assert!(Snapshot::default().is_empty());
        assert!(!Snapshot::new(3, 1, ConfState::default(), Vec::new()).is_empty());
    }

    #[test]
    fn entry_display() {
        let entry = Entry::new(2, 5, b"abc".to_vec()).with_type(EntryType::ConfChange);
        assert_eq!(entry.to_string(), "5@2 ConfChange (3 bytes)");
    }
}
