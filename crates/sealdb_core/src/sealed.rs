//! The encrypted database file and its companions on disk.
//!
//! ```text
//! <path>                  # sealed blob: nonce || ciphertext || tag
//! <path>.lock             # advisory lock for single-process ownership
//! <path>.settings.json    # default settings store (salt, breadcrumbs)
//! ```
//!
//! The sealed file is only ever replaced whole through
//! [`replace_file_atomic`], so a reader sees either the previous blob or
//! the new one.

use crate::crypto::{SealedBlob, MIN_SEALED_SIZE};
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use sealdb_storage::replace_file_atomic;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_SUFFIX: &str = "lock";
const SETTINGS_SUFFIX: &str = "settings.json";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns the default settings file path for a sealed database.
#[must_use]
pub fn default_settings_path(path: &Path) -> PathBuf {
    with_suffix(path, SETTINGS_SUFFIX)
}

/// Handle to the encrypted database file.
///
/// Holds an exclusive advisory lock on `<path>.lock` until
/// [`release`](Self::release) is called or the handle is dropped.
#[derive(Debug)]
pub struct SealedFile {
    path: PathBuf,
    lock_file: Mutex<Option<File>>,
}

impl SealedFile {
    /// Takes ownership of the sealed file at `path`.
    ///
    /// The file itself need not exist yet; a missing file is a new database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another handle holds the
    /// lock, or an I/O error if the lock file cannot be created.
    pub fn acquire(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_path = with_suffix(path, LOCK_SUFFIX);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Mutex::new(Some(lock_file)),
        })
    }

    /// Gives up the exclusive lock so another handle can take the file.
    ///
    /// Idempotent. The handle must not replace the sealed file afterwards.
    pub fn release(&self) {
        if let Some(file) = self.lock_file.lock().take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!(error = %e, "explicit unlock failed, closing lock file instead");
            }
            debug!(path = %self.path.display(), "released database lock");
        }
    }

    /// Returns true while the lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_file.lock().is_some()
    }

    /// Returns the sealed file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the sealed blob.
    ///
    /// Returns `None` if the file is missing or empty (no database yet).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedFile`] if the file is non-empty but
    /// too short to be a sealed blob, or an I/O error if it is unreadable.
    pub fn read(&self) -> CoreResult<Option<SealedBlob>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() < MIN_SEALED_SIZE {
            return Err(CoreError::corrupted_file(format!(
                "{} is {} bytes, shorter than the {MIN_SEALED_SIZE}-byte minimum",
                self.path.display(),
                bytes.len()
            )));
        }

        debug!(bytes = bytes.len(), "read sealed file");
        Ok(Some(SealedBlob::from_vec(bytes)))
    }

    /// Atomically replaces the sealed file with `blob`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write or rename fails. The previous
    /// blob is left intact in that case.
    pub fn replace(&self, blob: &SealedBlob) -> CoreResult<()> {
        replace_file_atomic(&self.path, blob.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AuthenticatedCipher, KeyMaterial};
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_new_database() {
        let temp = tempdir().unwrap();
        let sealed = SealedFile::acquire(&temp.path().join("app.db")).unwrap();
        assert!(sealed.read().unwrap().is_none());
    }

    #[test]
    fn empty_file_is_new_database() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.db");
        fs::write(&path, b"").unwrap();

        let sealed = SealedFile::acquire(&path).unwrap();
        assert!(sealed.read().unwrap().is_none());
    }

    #[test]
    fn short_file_is_corrupted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.db");
        fs::write(&path, [1u8; MIN_SEALED_SIZE - 1]).unwrap();

        let sealed = SealedFile::acquire(&path).unwrap();
        assert!(matches!(
            sealed.read(),
            Err(CoreError::CorruptedFile { .. })
        ));
    }

    #[test]
    fn replace_then_read() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("app.db");
        let sealed = SealedFile::acquire(&path).unwrap();

        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
        let blob = cipher.seal(b"payload").unwrap();
        sealed.replace(&blob).unwrap();

        assert_eq!(sealed.read().unwrap(), Some(blob));
    }

    #[test]
    fn lock_prevents_second_handle() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.db");

        let _first = SealedFile::acquire(&path).unwrap();
        assert!(matches!(
            SealedFile::acquire(&path),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.db");

        drop(SealedFile::acquire(&path).unwrap());
        SealedFile::acquire(&path).unwrap();
    }

    #[test]
    fn release_frees_lock_while_handle_lives() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.db");

        let first = SealedFile::acquire(&path).unwrap();
        first.release();
        first.release();

        assert!(!first.is_locked());
        let second = SealedFile::acquire(&path).unwrap();
        assert!(second.is_locked());
    }

    #[test]
    fn settings_path_is_sibling() {
        assert_eq!(
            default_settings_path(Path::new("/data/app.db")),
            PathBuf::from("/data/app.db.settings.json")
        );
    }
}
