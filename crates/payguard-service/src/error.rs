//! API and startup error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use payguard_core::{ConfigError, HandlerError, SigningError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request failed authentication. The message is safe to return.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<HandlerError> for ApiError {
    fn from(err: HandlerError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Errors that abort service startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration, key or certificate problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The signing key failed its startup self-test.
    #[error("signing self-test failed: {0}")]
    SelfTest(#[from] SigningError),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_message() {
        let response = ApiError::Unauthorized("Invalid webhook signature".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Invalid webhook signature"})
        );
    }

    #[tokio::test]
    async fn internal_hides_detail() {
        let response = ApiError::from(HandlerError("db password=hunter2".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "An internal error occurred"})
        );
    }
}
