//! # SealDB Testkit
//!
//! Test utilities for SealDB.
//!
//! This crate provides:
//! - Temporary vaults holding an encrypted database and its settings
//! - Crash simulation at the points the lifecycle cares about
//! - A settings store with switchable failures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sealdb_testkit::prelude::*;
//!
//! #[test]
//! fn survives_crash() {
//!     let vault = TestVault::new();
//!     let db = vault.open(PASSWORD).unwrap();
//!     insert_item(&db, "bolt");
//!     crash(db, CrashPoint::AfterFlush);
//!
//!     let db = vault.open(PASSWORD).unwrap();
//!     assert_eq!(item_names(&db), vec!["bolt"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
