//! Test fixtures and database helpers.
//!
//! A [`TestVault`] owns a temporary directory holding the encrypted file and
//! the working-copy directory, plus a settings store that outlives every
//! session opened from it. Opening twice from one vault is how tests model a
//! process restart.

use sealdb_core::crypto::{AuthenticatedCipher, KeyDerivation};
use sealdb_core::rusqlite::Connection;
use sealdb_core::{Config, CoreResult, Database, Value};
use sealdb_storage::{InMemorySettings, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Password used by most tests.
pub const PASSWORD: &str = "correct-horse";

/// PBKDF2 iterations for tests.
pub const TEST_KDF_ITERATIONS: u32 = 1_000;

/// How long tests wait for the flush worker to go idle.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Schema applied by [`TestVault::open`].
pub const ITEMS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)";

/// A temporary installation: encrypted file, settings and working directory.
pub struct TestVault {
    dir: TempDir,
    settings: Arc<dyn SettingsStore>,
    config: Config,
}

impl TestVault {
    /// Creates a vault backed by in-memory settings.
    pub fn new() -> Self {
        Self::with_settings(Arc::new(InMemorySettings::new()))
    }

    /// Creates a vault backed by `settings`.
    pub fn with_settings(settings: Arc<dyn SettingsStore>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config::new()
            .kdf_iterations(TEST_KDF_ITERATIONS)
            .flush_delay(Duration::from_millis(20))
            .max_flush_delay(Duration::from_millis(500))
            .working_dir(dir.path().join("working"));
        Self {
            dir,
            settings,
            config,
        }
    }

    /// Replaces the session configuration.
    pub fn configure(&mut self, f: impl FnOnce(Config) -> Config) {
        self.config = f(self.config.clone());
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the encrypted database path.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("vault.db")
    }

    /// Returns the temporary root directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the working-copy directory.
    pub fn working_dir(&self) -> PathBuf {
        self.config.resolved_working_dir()
    }

    /// Returns the shared settings store.
    pub fn settings(&self) -> Arc<dyn SettingsStore> {
        Arc::clone(&self.settings)
    }

    /// Reads a namespaced setting, e.g. `setting("salt")`.
    pub fn setting(&self, name: &str) -> Option<String> {
        self.settings
            .get(&self.config.settings_key(name))
            .expect("Failed to read setting")
    }

    /// Opens a session with the `items` schema.
    pub fn open(&self, password: &str) -> CoreResult<Database> {
        self.open_with_schema(password, items_schema)
    }

    /// Opens a session with a custom schema callback.
    pub fn open_with_schema<F>(&self, password: &str, apply_schema: F) -> CoreResult<Database>
    where
        F: FnOnce(&Connection) -> CoreResult<()>,
    {
        Database::open_with(
            &self.path(),
            password,
            self.settings(),
            self.config.clone(),
            apply_schema,
        )
    }

    /// Returns the encrypted file's bytes, or `None` if it does not exist.
    pub fn sealed_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.path()).ok()
    }

    /// Decrypts the encrypted file directly, bypassing the lifecycle.
    pub fn unseal(&self, password: &str) -> CoreResult<Option<Vec<u8>>> {
        let kdf = KeyDerivation::new(self.settings(), &self.config);
        let Some(salt) = kdf.current_salt()? else {
            return Ok(None);
        };
        let cipher = AuthenticatedCipher::new(&kdf.derive_key(password, &salt));
        let bytes = self.sealed_bytes().unwrap_or_default();
        Ok(cipher.open(&bytes)?.map(|p| p.to_vec()))
    }

    /// Reads item names straight from the encrypted file.
    pub fn sealed_item_names(&self, password: &str) -> Vec<String> {
        let plaintext = self
            .unseal(password)
            .expect("Failed to unseal")
            .expect("No sealed content");
        let scratch = self.dir.path().join("scratch.db");
        std::fs::write(&scratch, plaintext).expect("Failed to write scratch copy");
        let names = {
            let conn = Connection::open(&scratch).expect("Failed to open scratch copy");
            let mut stmt = conn
                .prepare("SELECT name FROM items ORDER BY id")
                .expect("Failed to prepare");
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .expect("Failed to query");
            rows.collect::<Result<Vec<_>, _>>().expect("Failed to read rows")
        };
        for path in [
            scratch.clone(),
            scratch.with_extension("db-wal"),
            scratch.with_extension("db-shm"),
        ] {
            let _ = std::fs::remove_file(path);
        }
        names
    }

    /// Lists the files currently in the working-copy directory.
    pub fn working_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.working_dir())
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default();
        files.sort();
        files
    }
}

impl Default for TestVault {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the `items` table.
pub fn items_schema(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(ITEMS_SCHEMA)?;
    Ok(())
}

/// Inserts one item through [`Database::execute`].
pub fn insert_item(db: &Database, name: &str) {
    db.execute(
        "INSERT INTO items (name) VALUES (?1)",
        &[Value::Text(name.to_string())],
    )
    .expect("Failed to insert item");
}

/// Returns item names in insertion order.
pub fn item_names(db: &Database) -> Vec<String> {
    db.execute("SELECT name FROM items ORDER BY id", &[])
        .expect("Failed to select items")
        .rows
        .into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(Value::Text(name)) => Some(name),
            _ => None,
        })
        .collect()
}

/// Runs a test against a fresh vault and an open session.
pub fn with_vault<F>(f: F)
where
    F: FnOnce(&TestVault, &Database),
{
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).expect("Failed to open vault");
    f(&vault, &db);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_roundtrip() {
        let vault = TestVault::new();
        let db = vault.open(PASSWORD).unwrap();
        insert_item(&db, "bolt");
        db.close().unwrap();

        assert_eq!(vault.sealed_item_names(PASSWORD), vec!["bolt"]);
        assert!(vault.working_files().is_empty());
    }

    #[test]
    fn with_vault_provides_session() {
        with_vault(|vault, db| {
            insert_item(db, "nut");
            assert_eq!(item_names(db), vec!["nut"]);
            assert!(vault.working_files().contains(&db.working_copy_path()));
        });
    }
}
