//! API error types.
//!
//! The same `{code, message}` pair is returned as an HTTP body by the unary
//! routes and as the `error` frame of an upload stream.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("size mismatch: declared {declared} bytes, received {observed}")]
    SizeMismatch { declared: u64, observed: u64 },

    #[error("upload cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] appdistrib_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(appdistrib_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] appdistrib_core::Error),
}

impl From<appdistrib_metadata::MetadataError> for ApiError {
    fn from(e: appdistrib_metadata::MetadataError) -> Self {
        // A uniqueness violation that slipped past the up-front checks is
        // still a client-visible collision.
        if e.is_conflict() {
            return Self::Conflict(e.to_string());
        }
        Self::Metadata(e)
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::HashMismatch { .. } => "hash_mismatch",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            Self::HashMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                appdistrib_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                appdistrib_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
