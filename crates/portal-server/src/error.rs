//! HTTP error types for the portal server.
//!
//! Maps domain errors from `portal-core` into HTTP responses. Every error
//! produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`. Internal failures are logged here, at the one
//! place they are turned into a 500, and their details are not echoed to the
//! client.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use portal_core::error::{DocumentError, GateError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The access gate is locked.
    Locked,
    /// Wrong password.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// A conflict (name taken, already initialized).
    Conflict(String),
    /// Unlock attempts are throttled.
    TooManyRequests { retry_after_secs: u64 },
    /// Internal server error. The string is logged, not returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Locked => (
                StatusCode::FORBIDDEN,
                "locked",
                "restricted content requires the access gate to be unlocked".to_owned(),
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::TooManyRequests { retry_after_secs } => {
                let body = ErrorBody {
                    error: "too_many_requests",
                    message: format!("too many failed attempts, retry in {retry_after_secs}s"),
                };
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                return response;
            }
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation { .. } => Self::BadRequest(err.to_string()),
            DocumentError::NotFound { .. } | DocumentError::TagNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            DocumentError::TagConflict { .. } => Self::Conflict(err.to_string()),
            DocumentError::Restricted { .. } => Self::Locked,
            DocumentError::Crypto { .. }
            | DocumentError::Corrupted { .. }
            | DocumentError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotInitialized | GateError::InvalidPassword { .. } => {
                Self::BadRequest(err.to_string())
            }
            GateError::AlreadyInitialized => Self::Conflict(err.to_string()),
            GateError::IncorrectPassword => Self::Unauthorized(err.to_string()),
            GateError::Throttled { retry_after_secs } => Self::TooManyRequests { retry_after_secs },
            GateError::Locked => Self::Locked,
            GateError::Crypto(_) | GateError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
