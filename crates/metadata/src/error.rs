//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

impl MetadataError {
    /// Whether this error is a uniqueness conflict, either detected up front
    /// or reported by the database.
    pub fn is_conflict(&self) -> bool {
        match self {
            MetadataError::AlreadyExists(_) => true,
            MetadataError::Database(sqlx::Error::Database(db_err)) => {
                db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint")
            }
            _ => false,
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
