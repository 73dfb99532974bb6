//! Error types for SealDB core.

use sealdb_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why an authenticated decryption was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFailure {
    /// The authentication tag did not verify: wrong key or tampered bytes.
    /// The cipher gives no finer signal than this.
    AuthenticationFailed,
    /// The blob is shorter than a nonce plus a tag.
    Truncated,
}

impl std::fmt::Display for DecryptionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationFailed => f.write_str("authentication failed"),
            Self::Truncated => f.write_str("sealed blob truncated"),
        }
    }
}

/// Coarse classification of an `open` failure.
///
/// A shell uses this to choose between re-prompting for a password and
/// showing a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    /// Re-prompt: the password did not unlock the database.
    WrongPassword,
    /// Hard failure: filesystem or settings store unavailable.
    StorageUnavailable,
    /// Hard failure with data-loss risk: the encrypted file is malformed.
    CorruptedFile,
    /// Anything else (schema callback, SQL engine, lock held).
    Other,
}

/// Errors that can occur in SealDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The primary encrypted file did not authenticate under the derived key.
    #[error("wrong password")]
    WrongPassword,

    /// The encrypted file exists and is non-empty but is not a sealed blob.
    #[error("corrupted encrypted file: {message}")]
    CorruptedFile {
        /// Description of the malformation.
        message: String,
    },

    /// Filesystem or settings-file failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The settings store holding the salt is unreachable or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Authenticated decryption was rejected.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// What the cipher reported.
        reason: DecryptionFailure,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// SQL engine error.
    #[error("sql error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The apply-schema callback failed.
    #[error("schema setup failed: {message}")]
    Schema {
        /// Description of the failure.
        message: String,
    },

    /// A checkpoint, seal or rename sequence failed.
    #[error("flush failed: {message}")]
    Flush {
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the database lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        Self::Storage(StorageError::Io(e))
    }
}

impl CoreError {
    /// Creates a corrupted file error.
    pub fn corrupted_file(message: impl Into<String>) -> Self {
        Self::CorruptedFile {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a decryption error.
    pub fn decryption(reason: DecryptionFailure) -> Self {
        Self::Decryption { reason }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a flush error.
    pub fn flush(message: impl Into<String>) -> Self {
        Self::Flush {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Classifies this error as an open failure.
    #[must_use]
    pub fn open_failure(&self) -> OpenFailure {
        match self {
            Self::WrongPassword => OpenFailure::WrongPassword,
            Self::Decryption {
                reason: DecryptionFailure::AuthenticationFailed,
            } => OpenFailure::WrongPassword,
            Self::CorruptedFile { .. }
            | Self::Decryption {
                reason: DecryptionFailure::Truncated,
            } => OpenFailure::CorruptedFile,
            Self::Storage(_) | Self::Configuration { .. } => OpenFailure::StorageUnavailable,
            _ => OpenFailure::Other,
        }
    }
}
