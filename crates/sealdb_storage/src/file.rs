//! File-based settings store.

use crate::atomic::replace_file_atomic;
use crate::error::{StorageError, StorageResult};
use crate::settings::SettingsStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A settings store persisted as a flat JSON object.
///
/// The whole file is rewritten through [`replace_file_atomic`] on every
/// mutation, so a crash never leaves a half-written settings file behind.
/// Reads are served from an in-memory copy loaded at open.
///
/// # Example
///
/// ```no_run
/// use sealdb_storage::{FileSettings, SettingsStore};
/// use std::path::Path;
///
/// let settings = FileSettings::open(Path::new("app.settings.json")).unwrap();
/// settings.set("sealdb.working_copy", "/tmp/sealdb/wc.db").unwrap();
/// ```
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileSettings {
    /// Opens the settings file at `path`, creating an empty store if the
    /// file does not exist yet. The file itself is only written on the
    /// first mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the file exists but cannot be
    /// read, or [`StorageError::Corrupted`] if it is not a JSON object of
    /// strings.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let values = match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::corrupted(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StorageError::unavailable(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(values)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        replace_file_atomic(&self.path, &data)
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&values) {
            values.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_missing_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = FileSettings::open(&path).unwrap();
        assert!(settings.get("anything").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        {
            let settings = FileSettings::open(&path).unwrap();
            settings.set("sealdb.salt", "AAECAw==").unwrap();
            settings.set("sealdb.working_copy", "/tmp/x.db").unwrap();
        }

        {
            let settings = FileSettings::open(&path).unwrap();
            assert_eq!(
                settings.get("sealdb.salt").unwrap().as_deref(),
                Some("AAECAw==")
            );
            assert_eq!(
                settings.get("sealdb.working_copy").unwrap().as_deref(),
                Some("/tmp/x.db")
            );
        }
    }

    #[test]
    fn file_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = FileSettings::open(&path).unwrap();
        settings.set("k", "v").unwrap();
        settings.remove("k").unwrap();
        settings.remove("k").unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert!(reopened.get("k").unwrap().is_none());
    }

    #[test]
    fn file_corrupted_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{ not json").unwrap();

        let result = FileSettings::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_empty_is_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"").unwrap();

        let settings = FileSettings::open(&path).unwrap();
        assert!(settings.get("k").unwrap().is_none());
    }

    #[test]
    fn file_failed_persist_rolls_back() {
        let dir = tempdir().unwrap();
        // A non-empty directory where the file should be makes persist fail.
        let path = dir.path().join("settings.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("block"), b"x").unwrap();

        let settings = FileSettings {
            path: path.clone(),
            values: RwLock::new(BTreeMap::new()),
        };
        assert!(settings.set("k", "v").is_err());
        assert!(settings.get("k").unwrap().is_none());
    }

    #[test]
    fn file_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = FileSettings::open(&path).unwrap();
        assert_eq!(settings.path(), path);
    }
}
