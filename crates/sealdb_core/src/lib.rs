//! # SealDB Core
//!
//! Encrypted-at-rest SQLite persistence for SealDB.
//!
//! This crate provides:
//! - Password-based key derivation with a persisted per-installation salt
//! - Authenticated sealing of the whole database file
//! - A plaintext working copy that the live connection reads and writes
//! - A debounced background flush that checkpoints, seals and atomically
//!   replaces the encrypted file
//! - Recovery of working copies orphaned by a crash
//! - Offline inspection of a database's on-disk state
//!
//! The entry point is [`Database`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod crypto;
mod database;
mod error;
pub mod flush;
mod inspect;
mod recovery;
mod sealed;
pub mod sql;
mod stats;
mod working_copy;

pub use config::{Config, DEFAULT_KDF_ITERATIONS};
pub use database::Database;
pub use error::{CoreError, CoreResult, DecryptionFailure, OpenFailure};
pub use flush::{FlushPhase, FlushReport, FlushStatus};
pub use inspect::{inspect, InspectReport};
pub use recovery::{
    DiscardReason, RecoveryDecision, RecoveryInspector, RecoveryOutcome, SealedSequence,
    SEALED_SEQ_KEY,
};
pub use sealed::{default_settings_path, SealedFile};
pub use sql::QueryResult;
pub use stats::{FlushStats, StatsSnapshot};
pub use working_copy::{WorkingCopy, WorkingCopyStore, WORKING_COPY_KEY};

pub use rusqlite;
pub use rusqlite::types::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
