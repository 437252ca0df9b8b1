//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid asset key: {0}")]
    InvalidKey(String),

    #[error("invalid build id: {0}")]
    InvalidBuildId(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
