//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorCode;
use orchestrator::LoadBalancerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request.
    BadRequest(String),
    /// The command was answered with a failure reply.
    Rejected(ErrorCode),
}

/// Maps a reply error code to the HTTP status it is served with.
pub fn status_for(code: &ErrorCode) -> StatusCode {
    match code.code.as_str() {
        ErrorCode::OPERATION_FAILURE => StatusCode::BAD_REQUEST,
        ErrorCode::RESOURCE_NOT_FOUND => StatusCode::NOT_FOUND,
        ErrorCode::UNKNOWN_MESSAGE => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::STORE_ERROR | ErrorCode::INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        // Anything else came from a backend.
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Rejected(code) => {
                let status = status_for(&code);
                if status.is_server_error() {
                    tracing::error!(code = %code.code, error = %code.description, "request failed");
                }
                (
                    status,
                    serde_json::json!({
                        "error": code.description,
                        "code": code.code,
                        "details": code.details,
                    }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        ApiError::Rejected(code)
    }
}

impl From<LoadBalancerError> for ApiError {
    fn from(err: LoadBalancerError) -> Self {
        ApiError::Rejected(err.to_error_code())
    }
}
