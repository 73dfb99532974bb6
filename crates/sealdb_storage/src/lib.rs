//! # SealDB Storage
//!
//! Settings store trait and filesystem primitives for SealDB.
//!
//! This crate provides the lowest-level storage abstractions. It knows
//! nothing about encryption, SQL, or the layout of a sealed database; it only
//! stores opaque settings strings and replaces whole files crash-safely.
//!
//! ## Design Principles
//!
//! - Settings are injected as a [`SettingsStore`] rather than read from
//!   ambient global state
//! - Every file replacement is write-temp, sync, rename, sync-directory
//! - Stores must be `Send + Sync` so the background flush worker can use them
//!
//! ## Available Stores
//!
//! - [`InMemorySettings`] - For testing and ephemeral sessions
//! - [`FileSettings`] - A JSON file persisted with [`replace_file_atomic`]
//!
//! ## Example
//!
//! ```rust
//! use sealdb_storage::{InMemorySettings, SettingsStore};
//!
//! let settings = InMemorySettings::new();
//! settings.set("sealdb.sealed_seq", "7").unwrap();
//! assert_eq!(settings.get("sealdb.sealed_seq").unwrap().as_deref(), Some("7"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod error;
mod file;
mod memory;
mod settings;

pub use atomic::{replace_file_atomic, sync_directory};
pub use error::{StorageError, StorageResult};
pub use file::FileSettings;
pub use memory::InMemorySettings;
pub use settings::SettingsStore;
