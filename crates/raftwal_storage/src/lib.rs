//! # raftwal Storage
//!
//! Memory-mapped file primitive for raftwal.
//!
//! This crate provides the lowest-level storage abstraction for raftwal.
//! A [`MappedFile`] is an **opaque byte view** over a file - it does not
//! interpret the data it holds.
//!
//! ## Design Principles
//!
//! - Mapped files are simple byte views (read, write, zero, grow, sync)
//! - No knowledge of slot layouts, meta fields or log segments
//! - Growth is the only operation that moves the mapping, and it requires
//!   exclusive access
//! - raftwal owns all file format interpretation
//!
//! ## Example
//!
//! ```no_run
//! use raftwal_storage::MappedFile;
//! use std::path::Path;
//!
//! let (mut file, _) = MappedFile::open(Path::new("00001.wal"), 4096).unwrap();
//! file.write_at(0, b"hello world").unwrap();
//! assert_eq!(file.read_at(0, 11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mapped;

pub use error::{StorageError, StorageResult};
pub use mapped::MappedFile;
