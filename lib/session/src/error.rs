//! Error types for the session crate.
//!
//! - `SessionError`: session lifecycle failures surfaced to callers
//! - `RefreshError`: token endpoint failures
//! - `StoreError`: durable storage failures (wrapped in a `Report`)

use slotwise_core::SessionId;
use std::fmt;

/// Errors from session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is unknown (never created, logged out, or swept).
    NotFound { id: SessionId },
    /// Session credentials expired and could not be refreshed.
    Expired { id: SessionId },
    /// Token refresh failed; the session has been removed.
    RefreshFailed { id: SessionId, source: RefreshError },
    /// The authorization code could not be exchanged for tokens.
    CodeExchangeFailed { reason: String },
    /// Durable storage rejected a write.
    StorageFailed { reason: String },
}

impl SessionError {
    /// Short reason suitable for the validation envelope.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "Session not found",
            Self::Expired { .. } | Self::RefreshFailed { .. } => "Session expired",
            Self::CodeExchangeFailed { .. } => "Authorization failed",
            Self::StorageFailed { .. } => "Session storage unavailable",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "session not found: {id}"),
            Self::Expired { id } => write!(f, "session expired: {id}"),
            Self::RefreshFailed { id, source } => {
                write!(f, "token refresh failed for session {id}: {source}")
            }
            Self::CodeExchangeFailed { reason } => {
                write!(f, "authorization code exchange failed: {reason}")
            }
            Self::StorageFailed { reason } => write!(f, "session storage failed: {reason}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RefreshFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors from the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The session never received a refresh token.
    MissingRefreshToken,
    /// The provider rejected the grant (revoked or expired refresh token).
    Rejected { reason: String },
    /// The token endpoint could not be reached.
    Transport { reason: String },
    /// The token endpoint did not answer in time.
    TimedOut,
    /// OAuth client configuration is invalid.
    Configuration { reason: String },
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRefreshToken => write!(f, "no refresh token available"),
            Self::Rejected { reason } => write!(f, "token grant rejected: {reason}"),
            Self::Transport { reason } => write!(f, "token endpoint unreachable: {reason}"),
            Self::TimedOut => write!(f, "token endpoint timed out"),
            Self::Configuration { reason } => write!(f, "invalid OAuth configuration: {reason}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Errors from durable session storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading the backing file failed.
    ReadFailed { path: String, reason: String },
    /// Writing the backing file failed.
    WriteFailed { path: String, reason: String },
    /// The document could not be encoded.
    EncodeFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed { path, reason } => {
                write!(f, "failed to read session store '{path}': {reason}")
            }
            Self::WriteFailed { path, reason } => {
                write!(f, "failed to write session store '{path}': {reason}")
            }
            Self::EncodeFailed { reason } => {
                write!(f, "failed to encode session store: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}
