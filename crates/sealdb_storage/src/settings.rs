//! Settings store trait definition.

use crate::error::StorageResult;

/// A small persistent key-value store for installation settings.
///
/// SealDB keeps two kinds of state here, never inside the encrypted file:
/// the per-installation key-derivation salt and the breadcrumb path of the
/// current plaintext working copy. Values are opaque strings; callers own
/// their encoding.
///
/// # Invariants
///
/// - `get` after a successful `set` returns the value that was set
/// - `set` is durable when it returns
/// - `remove` of a missing key succeeds
/// - Stores must be `Send + Sync`; a single process owns the store, so
///   last-writer-wins is an acceptable conflict policy
///
/// # Implementors
///
/// - [`super::InMemorySettings`] - For testing
/// - [`super::FileSettings`] - JSON file persisted with atomic replace
pub trait SettingsStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key` from the store. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<T: SettingsStore + ?Sized> SettingsStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}
