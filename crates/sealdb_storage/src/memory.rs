//! In-memory settings store for testing.

use crate::error::StorageResult;
use crate::settings::SettingsStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory settings store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests that simulate restarts by sharing one instance
///   between two database sessions
///
/// # Example
///
/// ```rust
/// use sealdb_storage::{InMemorySettings, SettingsStore};
///
/// let settings = InMemorySettings::new();
/// settings.set("app.salt", "c2FsdA==").unwrap();
/// assert_eq!(settings.get("app.salt").unwrap().as_deref(), Some("c2FsdA=="));
/// ```
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<BTreeMap<String, String>>,
}

impl InMemorySettings {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.write().remove(key);
        Ok(())
    }
}
