use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Service error taxonomy.
///
/// The wire surface collapses these to two shapes: `InvalidArgument`
/// (caller-fixable, message echoed verbatim) and everything else (server
/// side, generic message; detail is logged, not returned).
#[derive(Debug, Error)]
pub enum JvsError {
    /// The request violates a declared contract.
    #[error("{0}")]
    InvalidArgument(String),

    /// The primary signing pointer is missing, malformed, or references a
    /// version that is not enabled. The rotator is expected to heal this on
    /// its next tick.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Transient or permanent key store failure.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// Per-version failures during rotation, aggregated. Peer actions are
    /// not aborted by an individual failure.
    #[error("rotation failed: {}", .0.join("; "))]
    Rotation(Vec<String>),

    /// Anything else that should not leak to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for JvsError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            JvsError::InvalidArgument(message) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message.clone())
            }
            JvsError::FailedPrecondition(_)
            | JvsError::KeyStore(_)
            | JvsError::Rotation(_)
            | JvsError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_maps_to_bad_request() {
        let response = JvsError::InvalidArgument("bad ttl".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_kinds_map_to_internal_server_error() {
        let errors = [
            JvsError::FailedPrecondition("no primary".to_string()),
            JvsError::KeyStore("unavailable".to_string()),
            JvsError::Rotation(vec!["Disable failed".to_string()]),
            JvsError::Internal("boom".to_string()),
        ];

        for error in errors {
            let response = error.into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_rotation_error_joins_failures() {
        let error = JvsError::Rotation(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(error.to_string(), "rotation failed: first; second");
    }
}
