//! Session and credential bundle types.
//!
//! A session represents one authorized calendar connection. It is created
//! after a successful OAuth code exchange and holds the token bundle used for
//! every calendar call made on the user's behalf.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use slotwise_core::SessionId;

/// OAuth token bundle for one calendar connection.
///
/// Handed to other components by value for the duration of one call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Bearer token for calendar API calls.
    pub access_token: String,
    /// Long-lived token used to obtain new access tokens.
    pub refresh_token: Option<String>,
    /// Instant after which the access token is no longer accepted.
    pub expiry_instant: DateTime<Utc>,
}

impl Credentials {
    /// Creates a credential bundle.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expiry_instant: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expiry_instant,
        }
    }

    /// Returns true if the access token has expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_instant <= now
    }

    /// Returns true if the access token expires within `horizon` of `now`.
    #[must_use]
    pub fn expires_within(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        self.expiry_instant <= now + horizon
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry_instant", &self.expiry_instant)
            .finish()
    }
}

/// A server-held calendar session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    credentials: Credentials,
    created_at: DateTime<Utc>,
    cached_prompt: Option<String>,
}

impl Session {
    /// Creates a new session with the given ID and credentials.
    #[must_use]
    pub fn new(id: SessionId, credentials: Credentials) -> Self {
        Self::restore(id, credentials, Utc::now())
    }

    /// Rebuilds a session read back from durable storage.
    #[must_use]
    pub fn restore(id: SessionId, credentials: Credentials, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            credentials,
            created_at,
            cached_prompt: None,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the current credential bundle.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the cached system prompt, if any.
    #[must_use]
    pub fn cached_prompt(&self) -> Option<&str> {
        self.cached_prompt.as_deref()
    }

    /// Replaces the cached system prompt.
    pub fn set_cached_prompt(&mut self, prompt: Option<String>) {
        self.cached_prompt = prompt;
    }

    /// Applies a refreshed token, keeping the previous refresh token when the
    /// provider did not issue a new one.
    pub fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expiry_instant: DateTime<Utc>,
    ) {
        self.credentials.access_token = access_token;
        if refresh_token.is_some() {
            self.credentials.refresh_token = refresh_token;
        }
        self.credentials.expiry_instant = expiry_instant;
    }
}
