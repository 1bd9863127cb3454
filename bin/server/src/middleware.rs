//! Session extraction for Axum handlers.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use slotwise_core::SessionId;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// Header carrying the session id for clients that do not keep cookies.
pub const SESSION_HEADER: &str = "x-session-id";

/// The session id presented by the client, if any.
///
/// The `session` cookie wins over the `x-session-id` header. Handlers whose
/// body may also carry a session id fall back to it via [`SessionToken::or`].
pub struct SessionToken(pub Option<SessionId>);

impl SessionToken {
    /// Uses `fallback` when no cookie or header was present.
    #[must_use]
    pub fn or(self, fallback: Option<String>) -> Option<SessionId> {
        self.0.or_else(|| {
            fallback
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .map(SessionId::new)
        })
    }
}

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let from_cookie = jar
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().trim().to_string());
        let from_header = || {
            parts
                .headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        let id = from_cookie
            .filter(|id| !id.is_empty())
            .or_else(|| from_header().filter(|id| !id.is_empty()))
            .map(SessionId::new);
        Ok(SessionToken(id))
    }
}
