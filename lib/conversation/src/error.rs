//! Error types for the conversation crate.

use std::fmt;

/// Errors from tool lookup and parameter validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The model named a tool that is not in the catalog.
    UnknownTool { name: String },
    /// Required parameters are missing.
    InvalidParameters { name: String, missing: Vec<String> },
    /// The tool request could not be understood at all.
    Malformed { reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool: {name}"),
            Self::InvalidParameters { name, missing } => {
                write!(
                    f,
                    "missing required parameters for '{name}': {}",
                    missing.join(", ")
                )
            }
            Self::Malformed { reason } => write!(f, "malformed tool request: {reason}"),
        }
    }
}

impl std::error::Error for ToolError {}
