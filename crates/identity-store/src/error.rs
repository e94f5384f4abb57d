//! Storage error types.

use thiserror::Error;

/// Errors reading or writing the persisted identity.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File exists but does not hold a chat id
    #[error("Corrupt identity file: {0}")]
    Corrupt(String),
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;
