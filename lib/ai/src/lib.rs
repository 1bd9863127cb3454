//! Completion access for slotwise.
//!
//! This crate provides:
//!
//! - **Backends**: the [`CompletionBackend`] trait and an OpenAI-compatible
//!   HTTP implementation
//! - **Fallback**: a fixed-priority model roster and the orchestrator that
//!   retries, backs off and switches models
//! - **Compaction**: keeps conversation histories within context limits
//! - **Reply parsing**: defensive JSON extraction and tool request parsing

pub mod backend;
pub mod compaction;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod openai;
pub mod prompt;
pub mod reply;
pub mod roster;

pub use backend::{
    CompletionBackend, CompletionMessage, CompletionRequest, CompletionResponse, TokenUsage,
};
pub use compaction::{CompactOptions, Compactor, ContextLimits, HistorySize, measure, preserve_set};
pub use error::{FailureKind, FallbackError, LlmError};
pub use fallback::{FallbackConfig, FallbackOrchestrator, GenerationOutcome};
pub use openai::OpenAiBackend;
pub use prompt::SystemPrompt;
pub use reply::ModelReply;
pub use roster::{ModelEntry, ModelRoster, ModelStatus};
