//! Error handling for the HTTP server
//!
//! Every failure becomes a JSON envelope with a machine-readable code:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "NOT_FOUND",
//!     "message": "feature view 'driver_stats' does not exist in project 'ranking'"
//!   }
//! }
//! ```
//!
//! Status codes follow the error class: 404 for missing objects, 400 for
//! invalid requests (including name collisions and missing request data),
//! 503 for transient backend failures and 500 for everything else.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use featureloom_core::{Error, ErrorClass};
use serde::Serialize;
use std::fmt;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// Malformed request body (400)
    BadRequest(String),

    /// Error from the feature store
    Core(Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Core(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        let err = match self {
            AppError::BadRequest(_) => return (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Core(err) => err,
        };
        match err.class() {
            ErrorClass::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorClass::Collision => (StatusCode::BAD_REQUEST, "FEATURE_NAME_COLLISION"),
            ErrorClass::Validation => match err {
                Error::RequestDataNotFound(_) => {
                    (StatusCode::BAD_REQUEST, "REQUEST_DATA_NOT_FOUND")
                }
                Error::FeatureNotInView { .. } => (StatusCode::BAD_REQUEST, "FEATURE_NOT_FOUND"),
                _ => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            },
            ErrorClass::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ErrorClass::Storage | ErrorClass::Fatal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND")
    code: String,

    /// Human-readable error message
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Core(err)
    }
}
