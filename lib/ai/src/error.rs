//! Error types for the AI crate.
//!
//! - `LlmError`: one failed completion or discovery call
//! - `FailureKind`: how the fallback orchestrator reacts to an `LlmError`
//! - `FallbackError`: every candidate model failed

use std::fmt;

/// How a failed completion call is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying the same model after a backoff.
    Transient,
    /// The model is overloaded or out of quota; move on without retrying.
    Saturation,
    /// The request or response is unusable for this model; move on.
    Rejected,
}

/// Errors from completion backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The backend answered with a non-success HTTP status.
    Http { status: u16, body: String },
    /// The backend reports exhausted quota.
    QuotaExhausted { reason: String },
    /// The backend could not be reached.
    Connection { reason: String },
    /// No response within the per-call timeout.
    Timeout,
    /// The response body could not be understood.
    ResponseParseFailed { reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Classifies the error for retry and fallback decisions.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Http { status: 429 | 503, .. } | Self::QuotaExhausted { .. } => {
                FailureKind::Saturation
            }
            Self::Http { status, .. } if *status >= 500 => FailureKind::Transient,
            Self::Connection { .. } | Self::Timeout => FailureKind::Transient,
            Self::Http { .. } | Self::ResponseParseFailed { .. } | Self::InvalidConfig { .. } => {
                FailureKind::Rejected
            }
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { status, body } => {
                write!(f, "completion request failed with status {status}: {body}")
            }
            Self::QuotaExhausted { reason } => write!(f, "completion quota exhausted: {reason}"),
            Self::Connection { reason } => {
                write!(f, "completion backend unreachable: {reason}")
            }
            Self::Timeout => write!(f, "completion request timed out"),
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse completion response: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid completion backend configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from the model fallback orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    /// Every candidate model failed.
    AllModelsExhausted {
        attempted: Vec<String>,
        last_error: Option<LlmError>,
    },
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllModelsExhausted {
                attempted,
                last_error,
            } => {
                write!(f, "all models exhausted ({})", attempted.join(", "))?;
                if let Some(err) = last_error {
                    write!(f, ": {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for FallbackError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> LlmError {
        LlmError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(http(500).kind(), FailureKind::Transient);
        assert_eq!(http(502).kind(), FailureKind::Transient);
        assert_eq!(http(503).kind(), FailureKind::Saturation);
        assert_eq!(http(429).kind(), FailureKind::Saturation);
        assert_eq!(http(400).kind(), FailureKind::Rejected);
        assert_eq!(http(404).kind(), FailureKind::Rejected);
        assert_eq!(LlmError::Timeout.kind(), FailureKind::Transient);
        assert_eq!(
            LlmError::QuotaExhausted {
                reason: "daily".to_string()
            }
            .kind(),
            FailureKind::Saturation
        );
        assert_eq!(
            LlmError::ResponseParseFailed {
                reason: "eof".to_string()
            }
            .kind(),
            FailureKind::Rejected
        );
    }

    #[test]
    fn exhausted_display_lists_models() {
        let err = FallbackError::AllModelsExhausted {
            attempted: vec!["a".to_string(), "b".to_string()],
            last_error: Some(LlmError::Timeout),
        };
        let text = err.to_string();
        assert!(text.contains("a, b"));
        assert!(text.contains("timed out"));
    }
}
