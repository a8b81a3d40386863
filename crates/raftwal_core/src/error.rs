//! Error types for the durable log.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur in raftwal core operations.
///
/// `Compacted`, `Unavailable` and `SnapshotOutOfDate` are expected
/// conditions the consensus engine reacts to. Everything reported by
/// [`WalError::is_fatal`] means the files on disk can no longer be trusted.
#[derive(Debug, Error)]
pub enum WalError {
    /// Mapped file error.
    #[error("storage error: {0}")]
    Storage(#[from] raftwal_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested index is below the compaction floor.
    #[error("requested index is unavailable due to compaction")]
    Compacted,

    /// The requested index has not been written yet.
    #[error("requested entry at index is unavailable")]
    Unavailable,

    /// The requested snapshot is older than the existing one.
    #[error("requested index is older than the existing snapshot")]
    SnapshotOutOfDate,

    /// Persisted data is corrupted or has an unexpected layout.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// An earlier fatal error stopped the log.
    #[error("log is poisoned by an earlier fatal error")]
    Poisoned,

    /// The log is closed.
    #[error("log is closed")]
    Closed,
}

impl WalError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error leaves the on-disk state untrustworthy.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Corruption { .. } | Self::Poisoned => true,
            Self::Storage(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftwal_storage::StorageError;

    #[test]
    fn expected_conditions_are_not_fatal() {
        assert!(!WalError::Compacted.is_fatal());
        assert!(!WalError::Unavailable.is_fatal());
        assert!(!WalError::SnapshotOutOfDate.is_fatal());
        assert!(!WalError::invalid_operation("gap").is_fatal());
    }

    #[test]
    fn corruption_and_grow_failures_are_fatal() {
        assert!(WalError::corruption("bad slot").is_fatal());
        assert!(WalError::Poisoned.is_fatal());

        let grow = StorageError::GrowFailed {
            path: "00001.wal".into(),
            requested: 1 << 21,
            reason: "no space".into(),
        };
        assert!(WalError::from(grow).is_fatal());

        let bounds = StorageError::OutOfBounds {
            offset: 10,
            len: 8,
            mapped: 12,
        };
        assert!(!WalError::from(bounds).is_fatal());
    }
}
