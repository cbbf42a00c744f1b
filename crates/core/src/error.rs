//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown object class: {0}")]
    UnknownObjectClass(String),

    #[error("unknown check: {0}")]
    UnknownCheck(String),

    #[error("invalid access level: {0}")]
    InvalidAccessLevel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
