//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The settings file exists but could not be parsed.
    #[error("settings corrupted: {0}")]
    Corrupted(String),

    /// The settings store cannot be reached at all.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    /// There is not enough free space to complete an atomic replace.
    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    InsufficientSpace {
        /// Bytes required by the write.
        needed: u64,
        /// Bytes reported free on the target filesystem.
        available: u64,
    },
}

impl StorageError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates a corrupted settings error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
