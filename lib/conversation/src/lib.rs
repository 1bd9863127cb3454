//! Conversation types for slotwise.
//!
//! This crate provides:
//!
//! - **Messages**: role-tagged conversation turns with pin/importance flags
//! - **History store**: per-session conversation histories
//! - **Tool catalog**: the calendar tools the model may request, and the
//!   canonical invocation and result types

pub mod error;
pub mod history;
pub mod message;
pub mod tool;

pub use error::ToolError;
pub use history::ConversationStore;
pub use message::{Message, MessageRole};
pub use tool::{CALENDAR_TOOLS, ToolCatalog, ToolCategory, ToolInvocation, ToolResult, ToolSpec};
