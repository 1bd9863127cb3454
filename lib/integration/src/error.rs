//! Error types for the integration crate.
//!
//! - `CalendarError`: failures reported by a calendar transport
//! - `ParameterError`: tool parameters that cannot be turned into a request

use std::fmt;

/// Errors from calendar transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// The event does not exist (or no longer exists).
    NotFound { event_id: String },
    /// The provider throttled the request.
    RateLimited { retry_after_secs: Option<u64> },
    /// The access token was rejected.
    Unauthorized,
    /// The provider failed with a server-side error.
    Server { status: u16, body: String },
    /// The request was rejected for a non-retryable reason.
    Rejected { status: u16, body: String },
    /// Connection to the provider failed.
    Connection { reason: String },
    /// The call did not complete in time.
    Timeout,
    /// The provider response could not be read.
    InvalidResponse { reason: String },
    /// The transport is misconfigured.
    InvalidConfig { reason: String },
}

impl CalendarError {
    /// Whether the call may succeed if repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Connection { .. } | Self::Timeout
        )
    }

    /// A message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "That event could not be found",
            Self::RateLimited { .. } => "The calendar is busy right now, please try again shortly",
            Self::Unauthorized => "Calendar access was denied, please reconnect your account",
            Self::Server { .. } | Self::Connection { .. } | Self::Timeout => {
                "The calendar service is unavailable right now"
            }
            Self::Rejected { .. } => "The calendar rejected the request",
            Self::InvalidResponse { .. } => "The calendar returned an unexpected response",
            Self::InvalidConfig { .. } => "The calendar integration is not configured correctly",
        }
    }
}

impl fmt::Display for CalendarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { event_id } => write!(f, "event not found: {event_id}"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Unauthorized => write!(f, "access token rejected"),
            Self::Server { status, body } => write!(f, "server error {status}: {body}"),
            Self::Rejected { status, body } => write!(f, "request rejected {status}: {body}"),
            Self::Connection { reason } => write!(f, "connection failed: {reason}"),
            Self::Timeout => write!(f, "calendar call timed out"),
            Self::InvalidResponse { reason } => write!(f, "invalid response: {reason}"),
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for CalendarError {}

/// A tool parameter that has the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterError {
    /// Parameter name.
    pub field: String,
    /// What was expected.
    pub expected: &'static str,
}

impl ParameterError {
    pub(crate) fn new(field: impl Into<String>, expected: &'static str) -> Self {
        Self {
            field: field.into(),
            expected,
        }
    }
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter '{}' must be {}", self.field, self.expected)
    }
}

impl std::error::Error for ParameterError {}
