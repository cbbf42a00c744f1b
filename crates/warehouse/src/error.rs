//! Warehouse error types.

use thiserror::Error;

/// Warehouse query errors.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("warehouse unavailable: {0}")]
    Unavailable(String),
}

/// Result type for warehouse operations.
pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;
