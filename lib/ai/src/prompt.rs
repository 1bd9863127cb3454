//! System prompt for the scheduling assistant.
//!
//! The prompt tells the model which tools exist and the JSON reply shape
//! [`crate::reply::ModelReply`] expects. The instructions are built once per
//! session and cached by the caller; the time context is rendered per pass.

use chrono::{DateTime, Utc};
use slotwise_conversation::ToolCatalog;

/// Builder for the assistant system prompt.
#[derive(Debug, Clone)]
pub struct SystemPrompt<'a> {
    catalog: &'a ToolCatalog,
    timezone: Option<String>,
    now: DateTime<Utc>,
}

impl<'a> SystemPrompt<'a> {
    /// Creates a prompt for the given catalog, anchored at the current time.
    #[must_use]
    pub fn new(catalog: &'a ToolCatalog) -> Self {
        Self {
            catalog,
            timezone: None,
            now: Utc::now(),
        }
    }

    /// Sets the user's IANA timezone name.
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        let timezone = timezone.into();
        if !timezone.trim().is_empty() {
            self.timezone = Some(timezone);
        }
        self
    }

    /// Overrides the anchor time.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Renders the full prompt: the per-pass context line followed by the
    /// instructions.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.context(), self.instructions())
    }

    /// Renders the time and timezone line. Changes on every pass.
    #[must_use]
    pub fn context(&self) -> String {
        let timezone = self.timezone.as_deref().unwrap_or("UTC");
        format!(
            "Current time: {now} (UTC). The user's timezone is {timezone}; interpret \
             relative dates in it and send RFC 3339 timestamps with offsets.",
            now = self.now.to_rfc3339(),
        )
    }

    /// Renders the tool list and reply format. Stable for a catalog, so it is
    /// what callers cache per session.
    #[must_use]
    pub fn instructions(&self) -> String {
        format!(
            "You are a scheduling assistant that manages the user's calendar.\n\n\
             Tools:\n{tools}\n\
             Reply with a single JSON object and nothing else:\n\
             {{\"message\": \"<text for the user>\", \"tools\": [{{\"name\": \"<tool>\", \
             \"parameters\": {{...}}}}]}}\n\
             Use an empty tools list when no calendar action is needed. Find an event's \
             id with list_events before updating or deleting it.",
            tools = self.catalog.describe(),
        )
    }
}
