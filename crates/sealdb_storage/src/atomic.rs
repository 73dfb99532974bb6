//! Crash-safe whole-file replacement.
//!
//! Every durable write in SealDB that replaces an existing file (the sealed
//! database, the settings file) goes through [`replace_file_atomic`]:
//!
//! 1. Write the new bytes to a sibling temporary file
//! 2. Sync the temporary file to disk
//! 3. Rename it over the target
//! 4. Fsync the parent directory so the rename itself is durable
//!
//! A crash at any point leaves either the old or the new file in place,
//! never a torn mixture.

use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Atomically replaces the file at `path` with `data`.
///
/// If the rename step fails, available space on the target filesystem is
/// re-checked and the rename is retried exactly once when there is room.
///
/// # Errors
///
/// Returns [`StorageError::InsufficientSpace`] when the retry is refused for
/// lack of space, or [`StorageError::Io`] for any other failure. The target
/// file is left untouched on error.
pub fn replace_file_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = parent_dir(path);
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(&parent)?;
    }

    let temp_path = temp_sibling(path);
    if let Err(e) = write_synced(&temp_path, data) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    if let Err(first) = fs::rename(&temp_path, path) {
        let needed = data.len() as u64;
        let available = fs2::available_space(&parent).unwrap_or(0);
        if available < needed {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::InsufficientSpace { needed, available });
        }

        warn!(path = %path.display(), error = %first, "atomic rename failed, retrying once");
        if let Err(second) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(second.into());
        }
    }

    sync_directory(&parent)?;
    Ok(())
}

/// Returns the path of the temporary sibling used for one replace call.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sealdb".to_string());
    let temp_name = format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple());
    parent_dir(path).join(temp_name)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Syncs a directory so that entry creations, renames and removals are durable.
///
/// On Windows, directory fsync is not supported in the same way as Unix.
/// NTFS journals metadata operations, so the explicit sync is skipped there.
#[cfg(unix)]
pub fn sync_directory(dir: &Path) -> StorageResult<()> {
    let handle = File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

/// Syncs a directory so that entry creations, renames and removals are durable.
#[cfg(not(unix))]
pub fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replace_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        replace_file_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn replace_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        fs::write(&path, b"old contents that are longer").unwrap();
        replace_file_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn replace_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        for i in 0..5u8 {
            replace_file_atomic(&path, &[i; 64]).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn replace_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("data.bin");

        replace_file_atomic(&path, b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_rename_keeps_target() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the target path makes every rename fail.
        let path = dir.path().join("target");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), b"keep").unwrap();

        let result = replace_file_atomic(&path, b"data");
        assert!(result.is_err());
        assert_eq!(fs::read(path.join("inner")).unwrap(), b"keep");

        // Temporary sibling is cleaned up.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn replaced_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        replace_file_atomic(&path, b"s").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
