//! Boundary and API error types with IntoResponse
//!
//! [`HttpError`] is the client-facing error handler code raises while
//! holding a session; it rolls the session back like a database error.
//! [`ApiError`] is what handlers return.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pgsession_core::{ClassifyError, ErrorClass};
use serde_json::json;
use thiserror::Error;

/// Client-facing error with a status code and detail message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {detail}")]
pub struct HttpError {
    pub status: StatusCode,
    pub detail: String,
}

impl HttpError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, detail)
    }
}

impl ClassifyError for HttpError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Boundary
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.status.canonical_reason().unwrap_or("error"),
            "message": self.detail,
        }));
        (self.status, body).into_response()
    }
}

/// API error type with automatic HTTP status mapping
#[derive(Debug, Error)]
pub enum ApiError {
    /// Client-facing error (status from the error)
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Database error (500, logged)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error (500, logged)
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl ClassifyError for ApiError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Http(e) => e.class(),
            Self::Database(e) => e.class(),
            Self::Internal { .. } => ErrorClass::Other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Http(e) => e.into_response(),
            Self::Database(e) => {
                // Log the actual error, return generic message
                tracing::error!("Database error: {}", e);
                internal_error_response()
            }
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                internal_error_response()
            }
        }
    }
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal_error",
            "message": "an internal error occurred"
        })),
    )
        .into_response()
}
