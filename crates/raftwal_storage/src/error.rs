//! Error types for mapped-file operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while operating on a mapped file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to access bytes outside the current mapping.
    #[error("access out of bounds: offset {offset}, len {len}, mapped {mapped}")]
    OutOfBounds {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: usize,
        /// The current mapping size.
        mapped: u64,
    },

    /// Growing the mapping failed; the mapping can no longer be trusted.
    #[error("failed to grow {path} to {requested} bytes: {reason}")]
    GrowFailed {
        /// The file being grown.
        path: String,
        /// The requested size.
        requested: u64,
        /// What went wrong.
        reason: String,
    },

    /// A previous grow failed and the file refuses further access.
    #[error("mapping for {path} is poisoned by an earlier grow failure")]
    Poisoned {
        /// The poisoned file.
        path: String,
    },

    /// A mapping size that cannot be represented or mapped.
    #[error("invalid mapping size: {0}")]
    InvalidSize(u64),
}

impl StorageError {
    /// Returns true if the error means the mapping can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GrowFailed { .. } | Self::Poisoned { .. })
    }
}
