//! Unified error types for storage operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A destructive reset kept failing after every retry.
    #[error("reset of {path} failed after {attempts} attempts: {source}")]
    ResetExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Error serializing data.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Create a file I/O error with path context.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a reset exhaustion error.
    pub fn reset_exhausted(path: impl Into<PathBuf>, attempts: u32, source: std::io::Error) -> Self {
        Self::ResetExhausted {
            path: path.into(),
            attempts,
            source,
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
