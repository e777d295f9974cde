// =============================================================================
// Scanner error type
// =============================================================================
//
// Every fallible operation in the scanner returns `Result<T, ScannerError>`.
// REST handlers map each variant to an HTTP status; background tasks match
// on `Transient` to decide whether to retry.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    /// Backing store or upstream feed hiccupped; caller should retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Input failed validation or a stored record could not be parsed.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Missing or invalid configuration (env var, credential, enum value).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller is not authorised for the requested action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A rate-limit bucket rejected the request.
    #[error("rate limited: {scope}")]
    RateLimited { scope: String },

    /// A domain invariant was violated (a bug, not user/operator error).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ScannerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            Self::Malformed(_) => (StatusCode::BAD_REQUEST, "malformed"),
            Self::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration"),
            Self::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::InvariantViolation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        let body = json!({ "error": code, "detail": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

pub type ScannerResult<T> = Result<T, ScannerError>;
