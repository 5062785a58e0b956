//! API error types.

use apkrepo_core::{IndexError, RepositoryError, StorageError};
use axum::Json;
use axum::extract::multipart::MultipartError;
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

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Multipart(_) => "malformed_upload",
            Self::Repository(e) => match e {
                RepositoryError::InvalidFileName(_) | RepositoryError::UnsupportedFile(_) => {
                    "invalid_file"
                }
                RepositoryError::UnsupportedInMode { .. } => "unsupported_operation",
                RepositoryError::NoSigningKey => "no_signing_key",
                RepositoryError::Storage(_) => "storage_error",
                RepositoryError::Index(IndexError::LockTimeout { .. }) => "lock_timeout",
                RepositoryError::Index(IndexError::ExternalTool { .. }) => "index_tool_failed",
                RepositoryError::Index(IndexError::Signing { .. }) => "signing_failed",
                RepositoryError::Index(_) | RepositoryError::Io { .. } => "internal_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Multipart(e) => e.status(),
            Self::Repository(e) => match e {
                RepositoryError::InvalidFileName(_)
                | RepositoryError::UnsupportedFile(_)
                | RepositoryError::UnsupportedInMode { .. }
                | RepositoryError::NoSigningKey
                | RepositoryError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
                RepositoryError::Index(IndexError::LockTimeout { .. }) => StatusCode::CONFLICT,
                RepositoryError::Storage(_)
                | RepositoryError::Index(IndexError::ExternalTool { .. } | IndexError::Signing { .. }) => {
                    StatusCode::BAD_GATEWAY
                }
                RepositoryError::Index(_) | RepositoryError::Io { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
