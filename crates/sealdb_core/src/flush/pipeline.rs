//! The checkpoint, snapshot, seal and rename sequence.

use crate::crypto::AuthenticatedCipher;
use crate::error::{CoreError, CoreResult};
use crate::recovery::SealedSequence;
use crate::sealed::SealedFile;
use crate::sql;
use crate::working_copy::WorkingCopy;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Summary of one completed flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Write sequence carried by the sealed snapshot.
    pub write_seq: u64,
    /// Plaintext bytes sealed.
    pub bytes: u64,
    /// WAL frames moved into the base file by the checkpoint.
    pub checkpointed_frames: u64,
    /// Wall time of the whole sequence.
    pub elapsed: Duration,
}

/// Something the scheduler can flush.
pub trait FlushTarget: Send + Sync + 'static {
    /// Runs one complete flush sequence.
    ///
    /// # Errors
    ///
    /// Any failure leaves the previously sealed file intact.
    fn flush(&self) -> CoreResult<FlushReport>;
}

/// Live connection slot shared by the session and the flush sequence.
///
/// `None` once the session has closed the connection.
pub type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Seals the working copy of one open database.
pub struct SealPipeline {
    conn: SharedConnection,
    copy: Arc<WorkingCopy>,
    sealed: Arc<SealedFile>,
    cipher: RwLock<Arc<AuthenticatedCipher>>,
    sealed_seq: SealedSequence,
    // At most one sequence runs at a time, whichever thread drives it.
    serial: Mutex<()>,
}

impl SealPipeline {
    /// Creates a pipeline for an open session.
    pub fn new(
        conn: SharedConnection,
        copy: Arc<WorkingCopy>,
        sealed: Arc<SealedFile>,
        cipher: AuthenticatedCipher,
        sealed_seq: SealedSequence,
    ) -> Self {
        Self {
            conn,
            copy,
            sealed,
            cipher: RwLock::new(Arc::new(cipher)),
            sealed_seq,
            serial: Mutex::new(()),
        }
    }

    /// Seals the current content under `cipher` and, once the rename has
    /// succeeded, makes `cipher` the pipeline's cipher for later flushes.
    ///
    /// # Errors
    ///
    /// Returns the first failure. The cipher is only swapped on success, and
    /// the sealed file is untouched unless the rename happened.
    pub fn reseal(&self, cipher: AuthenticatedCipher) -> CoreResult<FlushReport> {
        let _serial = self.serial.lock();
        let report = self.run(&cipher)?;
        *self.cipher.write() = Arc::new(cipher);
        Ok(report)
    }

    fn run(&self, cipher: &AuthenticatedCipher) -> CoreResult<FlushReport> {
        let started = Instant::now();

        let (write_seq, frames, plaintext) = {
            let guard = self.conn.lock();
            let conn = guard.as_ref().ok_or(CoreError::DatabaseClosed)?;
            if !conn.is_autocommit() {
                return Err(CoreError::flush(
                    "a transaction is open on the live connection",
                ));
            }

            let write_seq = sql::bump_write_seq(conn)?;
            let outcome = sql::checkpoint(conn)?;
            if outcome.busy != 0 {
                return Err(CoreError::flush(format!(
                    "checkpoint blocked ({} of {} frames copied)",
                    outcome.checkpointed, outcome.log_frames
                )));
            }

            let plaintext = Zeroizing::new(std::fs::read(self.copy.path())?);
            self.copy.take_dirty();
            (
                write_seq,
                u64::try_from(outcome.checkpointed).unwrap_or(0),
                plaintext,
            )
        };

        let result = cipher
            .seal(&plaintext)
            .and_then(|blob| self.sealed.replace(&blob));
        if let Err(e) = result {
            self.copy.mark_dirty();
            return Err(e);
        }

        // A stale sealed sequence only biases recovery towards promoting the
        // working copy, which holds everything sealed here.
        if let Err(e) = self.sealed_seq.set(write_seq) {
            warn!(write_seq, error = %e, "sealed file replaced but sequence not recorded");
        }

        let report = FlushReport {
            write_seq,
            bytes: plaintext.len() as u64,
            checkpointed_frames: frames,
            elapsed: started.elapsed(),
        };
        debug!(
            write_seq,
            bytes = report.bytes,
            frames,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sealed working copy"
        );
        Ok(report)
    }
}

impl FlushTarget for SealPipeline {
    fn flush(&self) -> CoreResult<FlushReport> {
        let _serial = self.serial.lock();
        let cipher = Arc::clone(&self.cipher.read());
        self.run(&cipher)
    }
}

impl std::fmt::Debug for SealPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealPipeline")
            .field("working_copy", &self.copy.path())
            .field("sealed", &self.sealed.path())
            .finish_non_exhaustive()
    }
}
