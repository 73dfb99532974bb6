//! Benchmark utilities.

use rand::Rng;
use sealdb_core::{Config, Database, Value};
use sealdb_storage::InMemorySettings;
use std::sync::Arc;
use tempfile::TempDir;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A database location whose settings survive between sessions.
pub struct BenchVault {
    dir: TempDir,
    settings: Arc<InMemorySettings>,
}

impl BenchVault {
    /// Creates an empty vault in a temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            settings: Arc::new(InMemorySettings::new()),
        }
    }

    /// Opens a session. Auto-flush is off so the benchmark controls when
    /// flushes run.
    pub fn open(&self) -> Database {
        let config = Config::new()
            .kdf_iterations(1_000)
            .auto_flush(false)
            .working_dir(self.dir.path().join("working"));
        Database::open_with(
            &self.dir.path().join("bench.db"),
            "bench",
            self.settings.clone(),
            config,
            |conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS blobs (id INTEGER PRIMARY KEY, data BLOB)",
                )?;
                Ok(())
            },
        )
        .expect("Failed to open bench database")
    }
}

impl Default for BenchVault {
    fn default() -> Self {
        Self::new()
    }
}

/// Inserts `rows` rows of `payload` random bytes in one transaction.
pub fn populate(db: &Database, rows: usize, payload: usize) {
    db.transaction(|tx| {
        let mut stmt = tx.prepare("INSERT INTO blobs (data) VALUES (?1)")?;
        for _ in 0..rows {
            stmt.execute([random_data(payload)])?;
        }
        Ok(())
    })
    .expect("Failed to populate bench database");
}

/// Inserts one row of `payload` random bytes.
pub fn insert_blob(db: &Database, payload: usize) {
    db.execute(
        "INSERT INTO blobs (data) VALUES (?1)",
        &[Value::Blob(random_data(payload))],
    )
    .expect("Failed to insert");
}
