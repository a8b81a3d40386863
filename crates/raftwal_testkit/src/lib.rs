//! # raftwal Testkit
//!
//! Test utilities for raftwal.
//!
//! This crate provides:
//! - Temporary logs that clean up after themselves
//! - Property-based generators and a reference model of the log
//! - Crash simulation against the files of a closed log
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raftwal_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_log() {
//!     with_temp_log(|log| {
//!         log.append(&entries(1..4, 1)).unwrap();
//!         assert_eq!(log.last_index().unwrap(), 3);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
