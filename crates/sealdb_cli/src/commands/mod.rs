//! CLI command implementations.

pub mod init;
pub mod inspect;
pub mod rekey;
pub mod sql;
pub mod verify;

use sealdb_core::rusqlite::Connection;
use sealdb_core::{default_settings_path, Config, CoreResult, Database};
use sealdb_storage::FileSettings;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a command finds its database.
#[derive(Debug, Clone)]
pub struct Target {
    /// Encrypted database file.
    pub path: PathBuf,
    /// Settings file holding the salt and recovery bookkeeping.
    pub settings: PathBuf,
    /// Session configuration.
    pub config: Config,
}

impl Target {
    /// Creates a target, defaulting the settings file to
    /// `<path>.settings.json`.
    pub fn new(path: PathBuf, settings: Option<PathBuf>) -> Self {
        let settings = settings.unwrap_or_else(|| default_settings_path(&path));
        Self {
            path,
            settings,
            config: Config::default(),
        }
    }

    /// Opens the file-backed settings store.
    pub fn open_settings(&self) -> CoreResult<Arc<FileSettings>> {
        Ok(Arc::new(FileSettings::open(&self.settings)?))
    }

    /// Opens a session.
    pub fn open<F>(&self, password: &str, apply_schema: F) -> CoreResult<Database>
    where
        F: FnOnce(&Connection) -> CoreResult<()>,
    {
        Database::open_with(
            &self.path,
            password,
            self.open_settings()?,
            self.config.clone(),
            apply_schema,
        )
    }

    /// Returns true if the encrypted file exists and is non-empty.
    pub fn has_sealed_content(&self) -> bool {
        std::fs::metadata(&self.path).is_ok_and(|m| m.len() > 0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Target;
    use tempfile::TempDir;

    pub const PASSWORD: &str = "correct-horse";

    pub fn target(dir: &TempDir) -> Target {
        let mut target = Target::new(dir.path().join("app.db"), None);
        target.config = target
            .config
            .kdf_iterations(1_000)
            .working_dir(dir.path().join("wc"));
        target
    }
}
