//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as an HTTP response.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use learnhub_core::ports::PortError;
use serde_json::json;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request itself was malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Port(PortError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Port(PortError::AccessDenied(_)) => StatusCode::FORBIDDEN,
            ApiError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Port(PortError::Duplicate(_)) | ApiError::Port(PortError::Conflict(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
