//! Database facade: open, flush and close an encrypted-at-rest database.

use crate::config::Config;
use crate::crypto::{AuthenticatedCipher, KeyDerivation, Salt, SealedBlob};
use crate::error::{CoreError, CoreResult, DecryptionFailure};
use crate::flush::{
    FlushReport, FlushScheduler, FlushStatus, FlushTarget, SchedulerConfig, SealPipeline,
    SharedConnection,
};
use crate::recovery::{RecoveryDecision, RecoveryInspector, RecoveryOutcome, SealedSequence};
use crate::sealed::{default_settings_path, SealedFile};
use crate::sql::{self, QueryResult};
use crate::stats::{FlushStats, StatsSnapshot};
use crate::working_copy::{WorkingCopy, WorkingCopyStore};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value;
use rusqlite::Connection;
use sealdb_storage::{FileSettings, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// An open encrypted database.
///
/// `Database` owns the single live connection to a plaintext working copy
/// and keeps the encrypted file on disk in step with it:
/// - Every mutation marks the working copy dirty and, with auto-flush on,
///   requests a debounced background flush
/// - [`close`](Self::close) forces a final flush, then wipes the working copy
/// - A session that dies without closing leaves its working copy recorded,
///   and the next open decides whether to promote it
///
/// # Example
///
/// ```rust,no_run
/// use sealdb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("estimates.db"), "correct-horse", |conn| {
///     conn.execute_batch("CREATE TABLE IF NOT EXISTS items (name TEXT)")?;
///     Ok(())
/// })?;
///
/// db.execute("INSERT INTO items (name) VALUES ('bolt')", &[])?;
/// db.close()?;
/// # Ok::<(), sealdb_core::CoreError>(())
/// ```
pub struct Database {
    config: Config,
    sealed: Arc<SealedFile>,
    kdf: KeyDerivation,
    working_copies: WorkingCopyStore,
    copy: Arc<WorkingCopy>,
    conn: SharedConnection,
    pipeline: Arc<SealPipeline>,
    scheduler: FlushScheduler,
    recovery: RecoveryOutcome,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens the database at `path`, keeping settings in
    /// `<path>.settings.json`.
    ///
    /// A missing or empty file at `path` creates a new database.
    /// `apply_schema` runs once on the live connection before the handle is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`CoreError::WrongPassword`] if the encrypted file does not
    ///   authenticate under `password`
    /// - [`CoreError::CorruptedFile`] if the encrypted file is malformed
    /// - [`CoreError::Storage`] or [`CoreError::Configuration`] if the
    ///   filesystem or settings file is unavailable
    /// - [`CoreError::DatabaseLocked`] if another handle has it open
    /// - [`CoreError::Schema`] if `apply_schema` fails
    pub fn open<F>(path: &Path, password: &str, apply_schema: F) -> CoreResult<Self>
    where
        F: FnOnce(&Connection) -> CoreResult<()>,
    {
        let settings = FileSettings::open(&default_settings_path(path))?;
        Self::open_with(path, password, Arc::new(settings), Config::default(), apply_schema)
    }

    /// Opens the database with an explicit settings store and configuration.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with<F>(
        path: &Path,
        password: &str,
        settings: Arc<dyn SettingsStore>,
        config: Config,
        apply_schema: F,
    ) -> CoreResult<Self>
    where
        F: FnOnce(&Connection) -> CoreResult<()>,
    {
        let sealed = Arc::new(SealedFile::acquire(path)?);
        let kdf = KeyDerivation::new(Arc::clone(&settings), &config);
        let sealed_seq = SealedSequence::new(Arc::clone(&settings), &config);
        let working_copies = WorkingCopyStore::new(Arc::clone(&settings), &config);

        let (cipher, primary) = unlock(&kdf, &sealed, password)?;

        let recorded = working_copies.recorded_path()?;
        let decision = RecoveryInspector::new(sealed_seq.clone())
            .inspect(recorded.clone(), primary.as_deref().map(Vec::as_slice));
        let recovery = RecoveryOutcome::from(&decision);

        let source: &[u8] = match &decision {
            RecoveryDecision::Promote { plaintext, .. } => plaintext.as_slice(),
            _ => primary.as_deref().map_or(&[][..], Vec::as_slice),
        };
        let copy = Arc::new(working_copies.materialize(source)?);

        let conn = match start_session(&copy, &config, apply_schema) {
            Ok(conn) => conn,
            Err(e) => {
                if let Err(wipe_err) = working_copies.wipe(&copy) {
                    warn!(error = %wipe_err, "failed to wipe working copy after open failure");
                }
                // The orphan has not been dealt with yet; keep it discoverable.
                if let Err(restore_err) = working_copies.restore_recorded_path(recorded.as_deref())
                {
                    warn!(error = %restore_err, "failed to restore recorded working copy path");
                }
                return Err(e);
            }
        };

        match &decision {
            RecoveryDecision::Promote { path, .. } | RecoveryDecision::Discard { path, .. } => {
                if let Err(e) = working_copies.wipe_path(path) {
                    warn!(path = %path.display(), error = %e, "failed to wipe orphaned working copy");
                }
            }
            RecoveryDecision::NoCandidate { .. } => {}
        }
        let promoted = matches!(decision, RecoveryDecision::Promote { .. });
        drop(decision);

        if primary.is_none() || promoted {
            copy.mark_dirty();
        }

        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));
        let pipeline = Arc::new(SealPipeline::new(
            Arc::clone(&conn),
            Arc::clone(&copy),
            Arc::clone(&sealed),
            cipher,
            sealed_seq,
        ));
        let scheduler = FlushScheduler::start(
            Arc::clone(&pipeline) as Arc<dyn FlushTarget>,
            SchedulerConfig {
                max_delay: config.max_flush_delay,
                failure_warning_threshold: config.failure_warning_threshold,
            },
            Arc::new(FlushStats::new()),
        )?;

        if promoted {
            scheduler.request(Duration::ZERO);
        }

        info!(
            path = %path.display(),
            new = primary.is_none(),
            recovery = ?recovery,
            "opened sealed database"
        );

        Ok(Self {
            config,
            sealed,
            kdf,
            working_copies,
            copy,
            conn,
            pipeline,
            scheduler,
            recovery,
            is_open: RwLock::new(true),
        })
    }

    /// Runs one SQL statement on the live connection.
    ///
    /// A statement that may write marks the working copy dirty and, with
    /// auto-flush on, requests a flush after the configured delay.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Sqlite`] for SQL errors or
    /// [`CoreError::DatabaseClosed`] after close.
    pub fn execute(&self, sql: &str, params: &[Value]) -> CoreResult<QueryResult> {
        self.ensure_open()?;
        let (result, mutated) = {
            let guard = self.conn.lock();
            let conn = guard.as_ref().ok_or(CoreError::DatabaseClosed)?;
            sql::run_statement(conn, sql, params)?
        };
        if mutated {
            self.mutated();
        }
        Ok(result)
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a SQL error from begin/commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let value = {
            let mut guard = self.conn.lock();
            let conn = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
            let tx = conn.transaction()?;
            match f(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    value
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback() {
                        warn!(error = %rollback, "rollback failed");
                    }
                    return Err(e);
                }
            }
        };
        self.mutated();
        Ok(value)
    }

    /// Gives `f` direct access to the live connection.
    ///
    /// The working copy is treated as changed afterwards. No flush is
    /// requested; call [`request_flush`](Self::request_flush) after writes.
    ///
    /// `f` runs while the connection lock is held. Calling back into this
    /// `Database` from inside `f` ([`execute`](Self::execute),
    /// [`transaction`](Self::transaction), [`flush_now`](Self::flush_now),
    /// [`close`](Self::close) or another `with_connection`) deadlocks.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`.
    pub fn with_connection<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(CoreError::DatabaseClosed)?;
        let result = f(conn);
        self.copy.mark_dirty();
        result
    }

    /// Asks for the working copy to be sealed no earlier than `delay` from now.
    ///
    /// Coalesces with any pending request. A no-op after close.
    pub fn request_flush(&self, delay: Duration) {
        if !self.is_open() {
            return;
        }
        self.copy.mark_dirty();
        self.scheduler.request(delay);
    }

    /// Seals the working copy now and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the flush failure. The session stays usable.
    pub fn flush_now(&self) -> CoreResult<FlushReport> {
        self.ensure_open()?;
        self.scheduler.force_flush_blocking()
    }

    /// Blocks until no flush is queued, pending or running, or `timeout`
    /// elapses. Returns true if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Re-seals the database under a new password and a fresh salt.
    ///
    /// The new salt is staged before anything is sealed under it and only
    /// becomes the active salt after the encrypted file has been replaced.
    ///
    /// # Errors
    ///
    /// On failure before the replace the old password keeps working. A
    /// failure after it leaves the salt staged; the next open completes the
    /// switch.
    pub fn change_password(&self, new_password: &str) -> CoreResult<()> {
        self.ensure_open()?;

        let salt = Salt::generate();
        self.kdf.stage_pending_salt(&salt)?;
        let cipher = AuthenticatedCipher::new(&self.kdf.derive_key(new_password, &salt));

        match self.pipeline.reseal(cipher) {
            Ok(report) => {
                self.kdf.promote_pending_salt()?;
                info!(write_seq = report.write_seq, "changed database password");
                Ok(())
            }
            Err(e) => {
                if let Err(discard) = self.kdf.discard_pending_salt() {
                    warn!(error = %discard, "failed to discard staged salt");
                }
                Err(e)
            }
        }
    }

    /// Flushes, closes the connection, wipes the working copy and releases
    /// the file lock, so the same path can be opened again right away.
    ///
    /// Idempotent: later calls return `Ok(())` without flushing again.
    ///
    /// # Errors
    ///
    /// If the final flush fails the working copy is kept, still recorded,
    /// so the next open can recover it, and the flush error is returned.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;

        let final_flush = if self.copy.is_dirty() || self.scheduler.is_busy() {
            self.scheduler.force_flush_blocking().map(Some)
        } else {
            Ok(None)
        };
        self.scheduler.shutdown();

        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "error closing live connection");
            }
        }

        if let Err(e) = final_flush {
            error!(
                error = %e,
                path = %self.copy.path().display(),
                "final flush failed, keeping working copy for recovery"
            );
            self.sealed.release();
            return Err(e);
        }

        let wiped = self.working_copies.wipe(&self.copy);
        self.sealed.release();
        wiped?;
        info!(path = %self.sealed.path().display(), "closed sealed database");
        Ok(())
    }

    /// Drops the session as a crashed process would.
    ///
    /// Stops the flush worker without running pending flushes and leaks the
    /// live connection so its WAL is left as is. The working copy and its
    /// recorded path stay on disk. The file lock is released, as it would be
    /// when a process exits.
    pub fn abandon(self) {
        *self.is_open.write() = false;
        self.scheduler.shutdown();
        if let Some(conn) = self.conn.lock().take() {
            std::mem::forget(conn);
        }
        self.sealed.release();
        warn!(path = %self.copy.path().display(), "abandoned session without closing");
    }

    /// Returns true until [`close`](Self::close) or
    /// [`abandon`](Self::abandon).
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    fn mutated(&self) {
        self.copy.mark_dirty();
        if self.config.auto_flush {
            self.scheduler.request(self.config.flush_delay);
        }
    }

    /// Returns the encrypted file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.sealed.path()
    }

    /// Returns the working copy path.
    #[must_use]
    pub fn working_copy_path(&self) -> PathBuf {
        self.copy.path().to_path_buf()
    }

    /// Returns true if the working copy has changes not yet sealed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.copy.is_dirty()
    }

    /// Returns what open did about an orphaned working copy.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryOutcome {
        &self.recovery
    }

    /// Returns the flush scheduler status.
    #[must_use]
    pub fn flush_status(&self) -> FlushStatus {
        self.scheduler.status()
    }

    /// Returns a snapshot of the flush counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.scheduler.stats().snapshot()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Derives the key and decrypts the sealed file, if any.
///
/// Falls back to a salt staged by an interrupted password change; a
/// successful fallback completes that change.
fn unlock(
    kdf: &KeyDerivation,
    sealed: &SealedFile,
    password: &str,
) -> CoreResult<(AuthenticatedCipher, Option<Zeroizing<Vec<u8>>>)> {
    let Some(blob) = sealed.read()? else {
        let salt = kdf.get_or_create_salt()?;
        if kdf.pending_salt()?.is_some() {
            kdf.discard_pending_salt()?;
        }
        let cipher = AuthenticatedCipher::new(&kdf.derive_key(password, &salt));
        return Ok((cipher, None));
    };

    // Existing content was sealed under a stored salt; never mint a new one.
    let salt = kdf.current_salt()?;
    let pending = kdf.pending_salt()?;
    if salt.is_none() && pending.is_none() {
        return Err(CoreError::configuration(format!(
            "no salt stored for existing encrypted file {}",
            sealed.path().display()
        )));
    }

    let found = match &salt {
        Some(salt) => try_unseal(kdf, password, salt, &blob)?,
        None => None,
    };
    let (cipher, plaintext) = if let Some(found) = found {
        if pending.is_some() {
            info!("discarding salt staged by an unfinished password change");
            kdf.discard_pending_salt()?;
        }
        found
    } else {
        let retry = match &pending {
            Some(pending) => try_unseal(kdf, password, pending, &blob)?,
            None => None,
        };
        let found = retry.ok_or(CoreError::WrongPassword)?;
        kdf.promote_pending_salt()?;
        info!("completed interrupted password change");
        found
    };

    Ok((cipher, check_plaintext(plaintext)?))
}

/// Decrypts `blob` with the key derived under `salt`.
///
/// Returns `None` if the blob does not authenticate under that key.
pub(crate) fn try_unseal(
    kdf: &KeyDerivation,
    password: &str,
    salt: &Salt,
    blob: &SealedBlob,
) -> CoreResult<Option<(AuthenticatedCipher, Option<Zeroizing<Vec<u8>>>)>> {
    let cipher = AuthenticatedCipher::new(&kdf.derive_key(password, salt));
    match cipher.open(blob.as_bytes()) {
        Ok(plaintext) => Ok(Some((cipher, plaintext))),
        Err(CoreError::Decryption {
            reason: DecryptionFailure::AuthenticationFailed,
        }) => Ok(None),
        Err(CoreError::Decryption {
            reason: DecryptionFailure::Truncated,
        }) => Err(CoreError::corrupted_file("sealed blob truncated")),
        Err(e) => Err(e),
    }
}

/// Rejects decrypted content that is not a SQLite database.
///
/// Empty content counts as no database.
pub(crate) fn check_plaintext(
    plaintext: Option<Zeroizing<Vec<u8>>>,
) -> CoreResult<Option<Zeroizing<Vec<u8>>>> {
    let plaintext = plaintext.filter(|p| !p.is_empty());
    if let Some(bytes) = &plaintext {
        if !sql::has_sqlite_header(bytes) {
            return Err(CoreError::corrupted_file(
                "decrypted content is not a SQLite database",
            ));
        }
    }
    Ok(plaintext)
}

/// Opens the live connection and applies the schema.
///
/// Marks the working copy dirty if the schema callback changed anything.
fn start_session<F>(copy: &WorkingCopy, config: &Config, apply_schema: F) -> CoreResult<Connection>
where
    F: FnOnce(&Connection) -> CoreResult<()>,
{
    let conn = sql::open_live(copy.path(), config.busy_timeout)?;
    let before = sql::change_marker(&conn)?;
    apply_schema(&conn).map_err(|e| match e {
        CoreError::Schema { .. } => e,
        other => CoreError::schema(other.to_string()),
    })?;
    if sql::change_marker(&conn)? != before {
        copy.mark_dirty();
    }
    Ok(conn)
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.sealed.path())
            .field("is_open", &self.is_open())
            .field("dirty", &self.copy.is_dirty())
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "close on drop failed");
        }
    }
}
