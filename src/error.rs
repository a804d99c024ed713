use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::context::ContextError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Deadline Errors
///
/// The middleware itself never fails a request. These variants exist for
/// handlers that run work under a [`RequestContext`](crate::RequestContext)
/// and need to surface the context ending early:
///
/// - `DeadlineExceeded` - the request's deadline passed before the work finished
/// - `Cancelled` - the context was cancelled for another reason (shutdown, caller gone)
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<ContextError> for AppError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DeadlineExceeded => AppError::DeadlineExceeded(err.to_string()),
            ContextError::Cancelled => AppError::Cancelled(err.to_string()),
        }
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full details stay server-side; clients only get sanitized messages
        match &self {
            AppError::DeadlineExceeded(_) | AppError::Cancelled(_) | AppError::BadRequest(_) => {
                tracing::debug!(error = %self, "Request failed");
            }
            _ => tracing::error!(error = %self, "Request failed"),
        }

        let (status, error_type, message) = match &self {
            AppError::DeadlineExceeded(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "deadline_exceeded",
                "The request deadline passed before processing completed.",
            ),
            AppError::Cancelled(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "cancelled",
                "Request processing was cancelled. Please try again.",
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
