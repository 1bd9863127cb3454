//! HTTP routes.

use crate::coordinator::{ChatOutcome, ChatTurn, ConfirmOutcome};
use crate::error::ApiError;
use crate::middleware::{SESSION_COOKIE, SessionToken};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use slotwise_conversation::ToolInvocation;
use slotwise_core::SessionId;
use slotwise_session::ValidSession;
use std::sync::Arc;
use time::Duration as TimeDuration;
use tower_http::trace::TraceLayer;

/// Builds the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/session", post(create_session))
        .route("/api/auth/logout", post(logout))
        .route("/api/session/validate", get(validate_session))
        .route("/api/chat", post(chat))
        .route("/api/chat/confirm", post(confirm))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    session_id: String,
}

/// Exchanges an OAuth authorization code for a new session.
async fn create_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let code = body.code.trim();
    if code.is_empty() {
        return Err(ApiError::BadRequest {
            reason: "Missing authorization code".to_string(),
        });
    }

    let session_id = state.sessions().create_from_code(code).await?;
    tracing::info!(session_id = %session_id, "Session created");

    let cookie = Cookie::build((SESSION_COOKIE, session_id.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(state.cookies.secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::days(state.cookies.max_age_days));

    Ok((
        jar.add(cookie),
        Json(CreateSessionResponse {
            session_id: session_id.to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    valid: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

/// Reports whether the presented session is usable, refreshing it if needed.
async fn validate_session(
    State(state): State<Arc<AppState>>,
    token: SessionToken,
) -> impl IntoResponse {
    let Some(session_id) = token.0 else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ValidateResponse {
                valid: false,
                message: "No session".to_string(),
                created_at: None,
            }),
        );
    };

    match state.sessions().validate(&session_id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ValidateResponse {
                valid: true,
                message: "Session valid".to_string(),
                created_at: Some(session.created_at),
            }),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "Session invalid");
            (
                StatusCode::UNAUTHORIZED,
                Json(ValidateResponse {
                    valid: false,
                    message: e.reason().to_string(),
                    created_at: None,
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    message: String,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    pinned: bool,
}

/// Runs one orchestration pass.
async fn chat(
    State(state): State<Arc<AppState>>,
    token: SessionToken,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatOutcome>, ApiError> {
    let session = resolve(&state, token.or(body.session_id)).await?;
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest {
            reason: "Message is empty".to_string(),
        });
    }

    let outcome = state
        .coordinator
        .orchestrate(
            &session,
            ChatTurn {
                message: body.message,
                timezone: body.timezone,
                pinned: body.pinned,
            },
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    tools: Vec<JsonValue>,
    confirmed: bool,
    #[serde(default)]
    session_id: Option<String>,
}

/// Confirms or cancels tools held for confirmation.
async fn confirm(
    State(state): State<Arc<AppState>>,
    token: SessionToken,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<ConfirmOutcome>, ApiError> {
    let session = resolve(&state, token.or(body.session_id)).await?;
    let tools = body
        .tools
        .iter()
        .map(ToolInvocation::from_raw)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest {
            reason: e.to_string(),
        })?;
    if tools.is_empty() {
        return Err(ApiError::BadRequest {
            reason: "No tools to confirm".to_string(),
        });
    }

    Ok(Json(
        state
            .coordinator
            .confirm(&session, tools, body.confirmed)
            .await,
    ))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    success: bool,
}

/// Deletes the session regardless of its expiry.
async fn logout(
    State(state): State<Arc<AppState>>,
    token: SessionToken,
    jar: CookieJar,
) -> impl IntoResponse {
    let success = match token.0 {
        Some(session_id) => state.coordinator.logout(&session_id).await,
        None => false,
    };

    let remove_session = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove_session), Json(LogoutResponse { success }))
}

async fn resolve(
    state: &AppState,
    session_id: Option<SessionId>,
) -> Result<ValidSession, ApiError> {
    let session_id = session_id.ok_or(ApiError::NotAuthenticated)?;
    Ok(state.sessions().validate(&session_id).await?)
}
