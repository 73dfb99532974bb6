//! Offline inspection of a sealed database and its settings.

use crate::config::Config;
use crate::crypto::KeyDerivation;
use crate::database::{check_plaintext, try_unseal};
use crate::error::{CoreError, CoreResult};
use crate::recovery::{RecoveryInspector, RecoveryOutcome, SealedSequence};
use crate::sealed::SealedFile;
use crate::working_copy::WorkingCopyStore;
use sealdb_storage::SettingsStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What is on disk for one sealed database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectReport {
    /// Encrypted file path.
    pub path: PathBuf,
    /// Encrypted file size, `None` if there is no sealed content yet.
    pub sealed_bytes: Option<u64>,
    /// Whether an installation salt is stored.
    pub has_salt: bool,
    /// Whether a password change left a staged salt behind.
    pub rekey_pending: bool,
    /// Working copy recorded by the last session.
    pub recorded_working_copy: Option<PathBuf>,
    /// Write sequence of the last sealed snapshot.
    pub sealed_seq: u64,
    /// What the next open would do with the recorded working copy.
    ///
    /// `None` when no password was supplied.
    pub recovery: Option<RecoveryOutcome>,
}

/// Reports the state of the database at `path` without opening a session.
///
/// Nothing is created or wiped. With a password the recovery decision the
/// next open would take is computed too; probing folds the candidate's WAL
/// into it, as open would.
///
/// # Errors
///
/// - [`CoreError::DatabaseLocked`] if a session has the database open
/// - [`CoreError::WrongPassword`] if `password` does not decrypt the file
/// - [`CoreError::Configuration`] if the settings store is unreadable
pub fn inspect(
    path: &Path,
    password: Option<&str>,
    settings: Arc<dyn SettingsStore>,
    config: &Config,
) -> CoreResult<InspectReport> {
    let sealed = SealedFile::acquire(path)?;
    let kdf = KeyDerivation::new(Arc::clone(&settings), config);
    let salt = kdf.current_salt()?;
    let pending = kdf.pending_salt()?;
    let recorded = WorkingCopyStore::new(Arc::clone(&settings), config).recorded_path()?;
    let sealed_seq = SealedSequence::new(settings, config);
    let seq = sealed_seq.get()?;
    let blob = sealed.read()?;

    let recovery = match password {
        None => None,
        Some(password) => {
            let primary = match &blob {
                None => None,
                Some(blob) => {
                    let mut found = None;
                    for salt in salt.iter().chain(pending.iter()) {
                        if let Some((_, plaintext)) = try_unseal(&kdf, password, salt, blob)? {
                            found = Some(plaintext);
                            break;
                        }
                    }
                    check_plaintext(found.ok_or(CoreError::WrongPassword)?)?
                }
            };
            let decision = RecoveryInspector::new(sealed_seq)
                .inspect(recorded.clone(), primary.as_deref().map(Vec::as_slice));
            Some(RecoveryOutcome::from(&decision))
        }
    };

    Ok(InspectReport {
        path: path.to_path_buf(),
        sealed_bytes: blob.as_ref().map(|b| b.len() as u64),
        has_salt: salt.is_some(),
        rekey_pending: pending.is_some(),
        recorded_working_copy: recorded,
        sealed_seq: seq,
        recovery,
    })
}
