//! Worker error types.

use thiserror::Error;

use vmorph_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} has already finished")]
    JobFinished(JobId),

    #[error("Job {0} is still active")]
    JobActive(JobId),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Storage(#[from] vmorph_storage::StorageError),

    #[error(transparent)]
    Media(#[from] vmorph_media::MediaError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the job id was unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::JobNotFound(_))
    }
}
