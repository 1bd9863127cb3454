//! API error type.
//!
//! Every handler error is mapped to a status and a user-presentable message
//! here. The underlying error is logged, never returned to the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use slotwise_ai::FallbackError;
use slotwise_session::SessionError;
use std::fmt;

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// No session id was supplied.
    NotAuthenticated,
    /// Session lookup, validation or creation failed.
    Session(SessionError),
    /// The request body was unusable.
    BadRequest { reason: String },
    /// Every model failed for this pass.
    AiUnavailable(FallbackError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::Session(e) => write!(f, "{e}"),
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::AiUnavailable(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<FallbackError> for ApiError {
    fn from(e: FallbackError) -> Self {
        Self::AiUnavailable(e)
    }
}

impl ApiError {
    /// Status code and client-facing message.
    #[must_use]
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                "Please connect your calendar".to_string(),
            ),
            Self::Session(e) => match e {
                SessionError::NotFound { .. }
                | SessionError::Expired { .. }
                | SessionError::RefreshFailed { .. } => (
                    StatusCode::UNAUTHORIZED,
                    format!("{}, please reconnect your calendar", e.reason()),
                ),
                SessionError::CodeExchangeFailed { .. } => {
                    (StatusCode::BAD_REQUEST, e.reason().to_string())
                }
                SessionError::StorageFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, e.reason().to_string())
                }
            },
            Self::BadRequest { reason } => (StatusCode::BAD_REQUEST, reason.clone()),
            Self::AiUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "AI temporarily unavailable".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
