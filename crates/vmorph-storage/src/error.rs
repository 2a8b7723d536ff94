//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Video id {id} matches {count} stored files")]
    Ambiguous { id: String, count: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Upload exceeds the {limit_bytes} byte limit")]
    TooLarge { limit_bytes: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
