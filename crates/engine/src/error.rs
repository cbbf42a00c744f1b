//! Engine error types.

use rodwatch_storage::StorageError;
use thiserror::Error;

/// Client pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No client became available within the acquire timeout.
    #[error("timed out after {0:?} waiting for a storage client")]
    Timeout(std::time::Duration),

    /// A client could not be created after the configured number of attempts.
    #[error("failed to create a storage client after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("client pool is closed")]
    Closed,
}

impl PoolError {
    /// True if the pool can make no further progress.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. } | PoolError::Closed)
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
