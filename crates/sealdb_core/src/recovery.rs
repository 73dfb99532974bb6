//! Crash recovery: deciding what to do with an orphaned working copy.
//!
//! A working copy whose path is still recorded at open time was left by a
//! session that never closed cleanly. It may hold commits the sealed file
//! lacks, or it may be a stale or half-written artifact.
//!
//! ## Decision rule
//!
//! Every flush bumps a write sequence stored inside the database before its
//! checkpoint, and records the sealed sequence in settings after its rename.
//! For a candidate with sequence `c` and a recorded sealed sequence `s`:
//!
//! | Probe result                                   | Decision |
//! |------------------------------------------------|----------|
//! | empty, bad header, unopenable, fails quick_check | Discard  |
//! | `c < s`                                        | Discard (stale) |
//! | `c > s`                                        | Promote  |
//! | `c == s`, bytes differ from the sealed plaintext | Promote  |
//! | `c == s`, bytes identical                      | Discard  |
//!
//! Probing never fails; any error becomes a discard with a reason.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::sql;
use sealdb_storage::SettingsStore;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Settings key (without namespace) holding the last sealed write sequence.
pub const SEALED_SEQ_KEY: &str = "sealed_seq";

/// The write sequence of the last successfully sealed snapshot.
///
/// Missing or unparseable values read as 0.
#[derive(Clone)]
pub struct SealedSequence {
    settings: Arc<dyn SettingsStore>,
    key: String,
}

impl SealedSequence {
    /// Binds the sealed sequence to a settings store.
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsStore>, config: &Config) -> Self {
        Self {
            settings,
            key: config.settings_key(SEALED_SEQ_KEY),
        }
    }

    /// Returns the recorded sequence.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn get(&self) -> CoreResult<u64> {
        let value = self
            .settings
            .get(&self.key)
            .map_err(|e| CoreError::configuration(e.to_string()))?;
        Ok(value.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
    }

    /// Records `seq` as sealed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings store is unreachable.
    pub fn set(&self, seq: u64) -> CoreResult<()> {
        self.settings
            .set(&self.key, &seq.to_string())
            .map_err(|e| CoreError::configuration(e.to_string()))
    }
}

impl std::fmt::Debug for SealedSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSequence")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Why a candidate was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// The file has no bytes.
    Empty,
    /// The file does not start with the SQLite header.
    BadHeader,
    /// The file could not be opened or read as a database.
    Unreadable(String),
    /// `PRAGMA quick_check` reported damage.
    IntegrityCheckFailed,
    /// The sealed file already holds a later snapshot.
    Stale {
        /// Candidate write sequence.
        candidate: u64,
        /// Recorded sealed write sequence.
        sealed: u64,
    },
    /// The candidate matches the sealed content byte for byte.
    Identical,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty file"),
            Self::BadHeader => f.write_str("not a SQLite database"),
            Self::Unreadable(msg) => write!(f, "unreadable: {msg}"),
            Self::IntegrityCheckFailed => f.write_str("failed quick_check"),
            Self::Stale { candidate, sealed } => {
                write!(f, "stale (sequence {candidate} < sealed {sealed})")
            }
            Self::Identical => f.write_str("identical to sealed content"),
        }
    }
}

/// Outcome of inspecting the recorded working copy.
pub enum RecoveryDecision {
    /// Nothing recorded, or the recorded file no longer exists.
    NoCandidate {
        /// A recorded path whose file is gone.
        stale_record: Option<PathBuf>,
    },
    /// The candidate is authoritative and must be re-sealed.
    Promote {
        /// Orphan path.
        path: PathBuf,
        /// Candidate contents after folding in its WAL.
        plaintext: Zeroizing<Vec<u8>>,
        /// Candidate write sequence.
        write_seq: u64,
    },
    /// The sealed file is authoritative; the orphan should be wiped.
    Discard {
        /// Orphan path.
        path: PathBuf,
        /// Why the candidate lost.
        reason: DiscardReason,
    },
}

impl RecoveryDecision {
    /// Returns a short label for logs and the CLI.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoCandidate { .. } => "no-candidate",
            Self::Promote { .. } => "promote",
            Self::Discard { .. } => "discard",
        }
    }
}

impl std::fmt::Debug for RecoveryDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidate { stale_record } => f
                .debug_struct("NoCandidate")
                .field("stale_record", stale_record)
                .finish(),
            Self::Promote {
                path,
                plaintext,
                write_seq,
            } => f
                .debug_struct("Promote")
                .field("path", path)
                .field("bytes", &plaintext.len())
                .field("write_seq", write_seq)
                .finish(),
            Self::Discard { path, reason } => f
                .debug_struct("Discard")
                .field("path", path)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// What open did about an orphaned working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No orphan was found.
    Clean,
    /// The orphan's content became the session's content.
    Promoted {
        /// Orphan path, now wiped.
        path: PathBuf,
        /// Orphan write sequence.
        write_seq: u64,
    },
    /// The orphan was wiped and the sealed file used.
    Discarded {
        /// Orphan path, now wiped.
        path: PathBuf,
        /// Why the orphan lost.
        reason: DiscardReason,
    },
}

impl From<&RecoveryDecision> for RecoveryOutcome {
    fn from(decision: &RecoveryDecision) -> Self {
        match decision {
            RecoveryDecision::NoCandidate { .. } => Self::Clean,
            RecoveryDecision::Promote {
                path, write_seq, ..
            } => Self::Promoted {
                path: path.clone(),
                write_seq: *write_seq,
            },
            RecoveryDecision::Discard { path, reason } => Self::Discarded {
                path: path.clone(),
                reason: reason.clone(),
            },
        }
    }
}

/// Decides between a recorded orphan and the sealed file.
#[derive(Debug)]
pub struct RecoveryInspector {
    sealed_seq: SealedSequence,
}

impl RecoveryInspector {
    /// Creates an inspector reading the sealed sequence from `sealed_seq`.
    #[must_use]
    pub fn new(sealed_seq: SealedSequence) -> Self {
        Self { sealed_seq }
    }

    /// Inspects `recorded`, comparing it with the decrypted primary.
    ///
    /// `primary` is `None` when no sealed database exists yet.
    #[must_use]
    pub fn inspect(&self, recorded: Option<PathBuf>, primary: Option<&[u8]>) -> RecoveryDecision {
        let Some(path) = recorded else {
            return RecoveryDecision::NoCandidate { stale_record: None };
        };
        if !path.exists() {
            debug!(path = %path.display(), "recorded working copy no longer exists");
            return RecoveryDecision::NoCandidate {
                stale_record: Some(path),
            };
        }

        let (write_seq, plaintext) = match probe(&path) {
            Ok(found) => found,
            Err(reason) => return discard(path, reason),
        };

        let sealed = match self.sealed_seq.get() {
            Ok(seq) => seq,
            Err(e) => {
                // Unknown sealed sequence: fall back to a content comparison.
                warn!(error = %e, "could not read sealed sequence");
                write_seq
            }
        };

        if write_seq < sealed {
            return discard(
                path,
                DiscardReason::Stale {
                    candidate: write_seq,
                    sealed,
                },
            );
        }
        if write_seq == sealed && primary == Some(&plaintext[..]) {
            return discard(path, DiscardReason::Identical);
        }

        info!(
            path = %path.display(),
            candidate_seq = write_seq,
            sealed_seq = sealed,
            bytes = plaintext.len(),
            "promoting orphaned working copy"
        );
        RecoveryDecision::Promote {
            path,
            plaintext,
            write_seq,
        }
    }
}

fn discard(path: PathBuf, reason: DiscardReason) -> RecoveryDecision {
    info!(path = %path.display(), %reason, "discarding orphaned working copy");
    RecoveryDecision::Discard { path, reason }
}

/// Validates a candidate and returns its write sequence and bytes.
fn probe(path: &Path) -> Result<(u64, Zeroizing<Vec<u8>>), DiscardReason> {
    let mut header = [0u8; 16];
    let read = read_prefix(path, &mut header).map_err(|e| DiscardReason::Unreadable(e.to_string()))?;
    if read == 0 {
        return Err(DiscardReason::Empty);
    }
    if !sql::has_sqlite_header(&header[..read]) {
        return Err(DiscardReason::BadHeader);
    }

    let write_seq = {
        let conn = sql::open_existing(path).map_err(unreadable)?;
        if !sql::quick_check(&conn).map_err(unreadable)? {
            return Err(DiscardReason::IntegrityCheckFailed);
        }
        // Fold any committed WAL frames into the base file before reading it.
        sql::checkpoint(&conn).map_err(unreadable)?;
        let seq = sql::read_write_seq(&conn).map_err(unreadable)?;
        conn.close().map_err(|(_, e)| unreadable(e.into()))?;
        seq
    };

    let bytes = std::fs::read(path).map_err(|e| DiscardReason::Unreadable(e.to_string()))?;
    Ok((write_seq, Zeroizing::new(bytes)))
}

fn unreadable(e: CoreError) -> DiscardReason {
    DiscardReason::Unreadable(e.to_string())
}

fn read_prefix(path: &Path, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
