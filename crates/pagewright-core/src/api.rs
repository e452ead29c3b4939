//! HTTP error mapping shared by every PageWright service.
//!
//! Spec taxonomy → status code: `InvalidInput` 422, `Conflict` 409,
//! `NotFound` 404, `PreconditionFailed` 412, `Unavailable` 503, everything
//! else 500. Body-parse failures are 400 at the extractor layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::Error;

/// API result type for HTTP handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
}

/// HTTP API error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Returns an error response for malformed requests.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for invalid input (caller must fix).
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_ARGUMENT",
            message,
        )
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts (lock held, terminal record).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for fencing/token mismatches.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            "PRECONDITION_FAILED",
            message,
        )
    }

    /// Returns an error response for transient backend failures.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        match value {
            Error::InvalidId { message } => Self::invalid_argument(message),
            Error::InvalidInput(message) => Self::invalid_argument(message),
            Error::Conflict { message } => Self::conflict(message),
            Error::NotFound(message) => Self::not_found(message),
            Error::PreconditionFailed { message } => Self::precondition_failed(message),
            Error::Unavailable { message, .. } => Self::unavailable(message),
            Error::Serialization { message } | Error::Internal { message } => {
                // Internal detail stays in the logs; clients get an opaque code.
                tracing::error!(error = %message, "internal error at HTTP boundary");
                Self::internal("internal error")
            }
        }
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
///
/// Passed to `axum::serve(...).with_graceful_shutdown(...)` so every service
/// finishes in-flight requests and exits 0.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_spec_status_codes() {
        let cases = [
            (Error::InvalidInput("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::conflict("x"), StatusCode::CONFLICT),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::precondition_failed("x"),
                StatusCode::PRECONDITION_FAILED,
            ),
            (Error::unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (Error::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_are_opaque_to_clients() {
        let api = ApiError::from(Error::internal("tenant secret leaked here"));
        assert_eq!(api.message(), "internal error");
    }
}
