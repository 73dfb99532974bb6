//! Plaintext working copies of a sealed database.
//!
//! A working copy is the only file SQL ever touches. Its path is recorded in
//! the settings store before the file exists, so a process that dies at any
//! point after that leaves a breadcrumb the next open can follow.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use sealdb_storage::{sync_directory, SettingsStore};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settings key (without namespace) holding the recorded working copy path.
pub const WORKING_COPY_KEY: &str = "working_copy";

/// SQLite sidecar files that may sit beside a working copy.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

const WIPE_CHUNK: usize = 64 * 1024;

/// A plaintext database file at a process-local path.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
    created_at: SystemTime,
    dirty: AtomicBool,
}

impl WorkingCopy {
    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns when the file was created.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Returns true if the copy has changes not yet sealed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the copy as changed since the last flush.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning its previous value.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Creates, tracks and securely removes working copies.
pub struct WorkingCopyStore {
    dir: PathBuf,
    settings: Arc<dyn SettingsStore>,
    key: String,
    // Serializes record/clear so a clear never races a newer record.
    record_lock: Mutex<()>,
}

impl WorkingCopyStore {
    /// Creates a store for the configured working directory.
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsStore>, config: &Config) -> Self {
        Self {
            dir: config.resolved_working_dir(),
            settings,
            key: config.settings_key(WORKING_COPY_KEY),
            record_lock: Mutex::new(()),
        }
    }

    /// Returns the directory working copies are created in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `plaintext` to a new private file and records its path.
    ///
    /// The path is recorded before the file is created. If the write fails,
    /// the partial file is removed and the previously recorded path, if any,
    /// is put back.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path cannot be recorded, or a
    /// storage error if the file cannot be written.
    pub fn materialize(&self, plaintext: &[u8]) -> CoreResult<WorkingCopy> {
        self.ensure_dir()?;
        let path = self.dir.join(format!("sealdb-{}.db", Uuid::new_v4()));

        let previous = self.recorded_path()?;
        self.record_path(&path)?;

        if let Err(e) = self.write_new(&path, plaintext) {
            if let Err(shred_err) = shred(&path) {
                warn!(path = %path.display(), error = %shred_err, "failed to remove partial working copy");
            }
            if let Err(restore_err) = self.restore_recorded_path(previous.as_deref()) {
                warn!(error = %restore_err, "failed to restore recorded working copy path");
            }
            return Err(e);
        }

        info!(path = %path.display(), bytes = plaintext.len(), "materialized working copy");

        Ok(WorkingCopy {
            path,
            created_at: SystemTime::now(),
            dirty: AtomicBool::new(false),
        })
    }

    /// Returns the recorded working copy path, if any.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn recorded_path(&self) -> CoreResult<Option<PathBuf>> {
        self.settings
            .get(&self.key)
            .map(|value| value.filter(|v| !v.is_empty()).map(PathBuf::from))
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    /// Records `path` as the last known working copy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn record_path(&self, path: &Path) -> CoreResult<()> {
        let _guard = self.record_lock.lock();
        self.settings
            .set(&self.key, &path.to_string_lossy())
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    /// Puts back a breadcrumb read before a failed session start.
    ///
    /// Records `previous` if it is still on disk, otherwise clears the
    /// recorded path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn restore_recorded_path(&self, previous: Option<&Path>) -> CoreResult<()> {
        match previous.filter(|p| p.exists()) {
            Some(path) => {
                self.record_path(path)?;
                info!(path = %path.display(), "kept orphaned working copy recorded");
                Ok(())
            }
            None => self.clear_recorded_path(),
        }
    }

    /// Clears the recorded working copy path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn clear_recorded_path(&self) -> CoreResult<()> {
        let _guard = self.record_lock.lock();
        self.settings
            .remove(&self.key)
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    /// Removes a working copy and clears its breadcrumb.
    ///
    /// Idempotent: missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first error hit, after attempting every step.
    pub fn wipe(&self, copy: &WorkingCopy) -> CoreResult<()> {
        self.wipe_path(copy.path())
    }

    /// Removes the file at `path` (and its SQLite sidecars) and clears the
    /// recorded path if it still names `path`.
    ///
    /// # Errors
    ///
    /// Returns the first error hit, after attempting every step.
    pub fn wipe_path(&self, path: &Path) -> CoreResult<()> {
        let mut first_error: Option<CoreError> = None;

        for target in std::iter::once(path.to_path_buf()).chain(sidecars(path)) {
            if let Err(e) = shred(&target) {
                warn!(path = %target.display(), error = %e, "failed to wipe file");
                first_error.get_or_insert(e.into());
            }
        }

        {
            let _guard = self.record_lock.lock();
            let recorded = self
                .settings
                .get(&self.key)
                .map_err(|e| CoreError::configuration(e.to_string()));
            match recorded {
                Ok(Some(value)) if Path::new(&value) == path => {
                    if let Err(e) = self.settings.remove(&self.key) {
                        first_error.get_or_insert(CoreError::configuration(e.to_string()));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(path = %path.display(), "wiped working copy");
                Ok(())
            }
        }
    }

    fn write_new(&self, path: &Path, plaintext: &[u8]) -> CoreResult<()> {
        let mut file = create_private(path)?;
        file.write_all(plaintext)?;
        file.sync_all()?;
        drop(file);
        sync_directory(&self.dir)?;
        Ok(())
    }

    fn ensure_dir(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkingCopyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingCopyStore")
            .field("dir", &self.dir)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Returns the SQLite sidecar paths for a database file.
pub(crate) fn sidecars(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    SIDECAR_SUFFIXES.iter().map(move |suffix| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    })
}

fn create_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Overwrites a file with zeros, then unlinks it. Missing files are fine.
fn shred(path: &Path) -> std::io::Result<()> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let zeros = [0u8; WIPE_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(WIPE_CHUNK as u64) as usize;
        file.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    file.sync_all()?;
    drop(file);

    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdb_storage::InMemorySettings;
    use tempfile::tempdir;

    fn store(dir: &Path) -> (WorkingCopyStore, Arc<InMemorySettings>) {
        let settings = Arc::new(InMemorySettings::new());
        let config = Config::new().working_dir(dir);
        (WorkingCopyStore::new(settings.clone(), &config), settings)
    }

    #[test]
    fn materialize_writes_and_records() {
        let temp = tempdir().unwrap();
        let (store, settings) = store(temp.path());

        let copy = store.materialize(b"plaintext pages").unwrap();
        assert_eq!(fs::read(copy.path()).unwrap(), b"plaintext pages");
        assert!(!copy.is_dirty());
        assert_eq!(
            store.recorded_path().unwrap().as_deref(),
            Some(copy.path())
        );
        assert!(settings.get("sealdb.working_copy").unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn materialize_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let (store, _) = store(&temp.path().join("wc"));
        let copy = store.materialize(b"x").unwrap();

        let mode = fs::metadata(copy.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn each_materialize_gets_a_new_path() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());

        let a = store.materialize(b"a").unwrap();
        let b = store.materialize(b"b").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(store.recorded_path().unwrap().as_deref(), Some(b.path()));
    }

    #[test]
    fn wipe_removes_file_sidecars_and_breadcrumb() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());

        let copy = store.materialize(b"secret").unwrap();
        let sidecar_paths: Vec<_> = sidecars(copy.path()).collect();
        fs::write(&sidecar_paths[0], b"wal frames").unwrap();

        store.wipe(&copy).unwrap();

        assert!(!copy.path().exists());
        assert!(!sidecar_paths[0].exists());
        assert!(store.recorded_path().unwrap().is_none());
    }

    #[test]
    fn wipe_is_idempotent() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());

        let copy = store.materialize(b"secret").unwrap();
        store.wipe(&copy).unwrap();
        store.wipe(&copy).unwrap();
    }

    #[test]
    fn wipe_keeps_newer_breadcrumb() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());

        let old = store.materialize(b"old").unwrap();
        let new = store.materialize(b"new").unwrap();

        store.wipe(&old).unwrap();
        assert_eq!(store.recorded_path().unwrap().as_deref(), Some(new.path()));
    }

    #[test]
    fn restore_puts_back_an_existing_orphan() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());

        let orphan = store.materialize(b"orphan").unwrap();
        let replacement = store.materialize(b"new").unwrap();
        store.wipe(&replacement).unwrap();
        assert!(store.recorded_path().unwrap().is_none());

        store.restore_recorded_path(Some(orphan.path())).unwrap();
        assert_eq!(store.recorded_path().unwrap().as_deref(), Some(orphan.path()));

        store.wipe(&orphan).unwrap();
        store.restore_recorded_path(Some(orphan.path())).unwrap();
        assert!(store.recorded_path().unwrap().is_none());
    }

    #[test]
    fn dirty_flag() {
        let temp = tempdir().unwrap();
        let (store, _) = store(temp.path());
        let copy = store.materialize(b"").unwrap();

        copy.mark_dirty();
        assert!(copy.is_dirty());
        assert!(copy.take_dirty());
        assert!(!copy.is_dirty());
        assert!(!copy.take_dirty());
    }

    #[test]
    fn empty_recorded_value_is_absent() {
        let temp = tempdir().unwrap();
        let settings = Arc::new(InMemorySettings::with_entries([("sealdb.working_copy", "")]));
        let store = WorkingCopyStore::new(settings, &Config::new().working_dir(temp.path()));
        assert!(store.recorded_path().unwrap().is_none());
    }
}
