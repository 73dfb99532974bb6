//! Crash simulation for SealDB.
//!
//! A crash is modelled with [`Database::abandon`], which stops the flush
//! worker and leaks the live connection without flushing, wiping or clearing
//! the recorded working-copy path. The points below set up the on-disk state
//! a real crash would leave at each stage of the flush sequence.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sealdb_testkit::{crash, CrashPoint, TestVault, PASSWORD};
//!
//! let vault = TestVault::new();
//! let db = vault.open(PASSWORD)?;
//! let orphan = crash(db, CrashPoint::BeforeFlush);
//! assert!(orphan.exists());
//! ```

use crate::fixtures::{TestVault, IDLE_TIMEOUT};
use sealdb_core::{Database, SEALED_SEQ_KEY};
use sealdb_storage::SettingsStore;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash with committed writes that were never sealed.
    BeforeFlush,
    /// Crash after every pending flush completed.
    AfterFlush,
}

/// Simulates a crash of `db` at `point` and returns the orphaned
/// working-copy path.
pub fn crash(db: Database, point: CrashPoint) -> PathBuf {
    match point {
        CrashPoint::BeforeFlush => {}
        CrashPoint::AfterFlush => {
            db.flush_now().expect("Failed to flush before crash");
            assert!(db.wait_idle(IDLE_TIMEOUT), "flush worker did not go idle");
        }
    }
    let orphan = db.working_copy_path();
    db.abandon();
    orphan
}

/// Crashes between the rename and recording the sealed sequence.
///
/// Flushes, then rolls the recorded sealed sequence back by one, as if the
/// process died right after the rename.
pub fn crash_before_sequence_recorded(vault: &TestVault, db: Database) -> PathBuf {
    let orphan = crash(db, CrashPoint::AfterFlush);
    let key = vault.config().settings_key(SEALED_SEQ_KEY);
    let settings = vault.settings();
    let sealed: u64 = settings
        .get(&key)
        .expect("Failed to read sealed sequence")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    settings
        .set(&key, &sealed.saturating_sub(1).to_string())
        .expect("Failed to roll back sealed sequence");
    orphan
}

/// Flips every bit of the byte at `offset`.
pub fn flip_byte(path: &Path, offset: u64) {
    let mut bytes = std::fs::read(path).expect("Failed to read file");
    let index = usize::try_from(offset).expect("offset out of range");
    bytes[index] ^= 0xff;
    std::fs::write(path, bytes).expect("Failed to write file");
}

/// Truncates `path` to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    file.set_len(len).expect("Failed to truncate file");
}

/// Overwrites the first bytes of `path` with `garbage`.
pub fn clobber_header(path: &Path, garbage: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    file.seek(SeekFrom::Start(0)).expect("Failed to seek");
    file.write_all(garbage).expect("Failed to write");
    file.sync_all().expect("Failed to sync");
}

/// Writes `contents` into the working directory and records it as the
/// working copy, as a session killed mid-materialization would leave it.
pub fn plant_orphan(vault: &TestVault, name: &str, contents: &[u8]) -> PathBuf {
    let dir = vault.working_dir();
    std::fs::create_dir_all(&dir).expect("Failed to create working dir");
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to plant orphan");
    vault
        .settings()
        .set(
            &vault.config().settings_key(sealdb_core::WORKING_COPY_KEY),
            &path.to_string_lossy(),
        )
        .expect("Failed to record orphan");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{insert_item, PASSWORD};

    #[test]
    fn crash_leaves_breadcrumb() {
        let vault = TestVault::new();
        let db = vault.open(PASSWORD).unwrap();
        insert_item(&db, "bolt");

        let orphan = crash(db, CrashPoint::BeforeFlush);

        assert!(orphan.exists());
        assert_eq!(
            vault.setting(sealdb_core::WORKING_COPY_KEY).map(PathBuf::from),
            Some(orphan)
        );
    }

    #[test]
    fn flip_byte_changes_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        flip_byte(&path, 1);

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, !2u8, 3]);
    }
}
