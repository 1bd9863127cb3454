//! Parsing of the assistant's reply into user text and tool invocations.
//!
//! The model is asked for `{"message": ..., "tools": [...]}` but does not
//! always comply. Anything that cannot be read as that shape is treated as a
//! plain text reply with no tools; a malformed reply is never an error.

use crate::extract::extract_object;
use serde_json::{Map, Value as JsonValue};
use slotwise_conversation::ToolInvocation;

const MESSAGE_FIELDS: &[&str] = &["message", "response", "reply", "text"];
const TOOL_FIELDS: &[&str] = &["tools", "tool_calls", "toolCalls", "actions"];

/// The parsed assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    /// Text for the user.
    pub message: String,
    /// Requested tool invocations, in emitted order.
    pub tools: Vec<ToolInvocation>,
    /// Tool entries that could not be normalized.
    pub dropped_tools: usize,
}

impl ModelReply {
    /// Parses raw model output.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let Some((strategy, object)) = extract_object(text) else {
            return Self::plain(text);
        };

        let message = MESSAGE_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(JsonValue::as_str))
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let raw_tools = tool_entries(&object);
        if message.is_empty() && raw_tools.is_empty() {
            return Self::plain(text);
        }

        let mut tools = Vec::with_capacity(raw_tools.len());
        let mut dropped_tools = 0;
        for raw in raw_tools {
            match ToolInvocation::from_raw(&raw) {
                Ok(invocation) => tools.push(invocation),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed tool request");
                    dropped_tools += 1;
                }
            }
        }

        tracing::debug!(strategy = strategy.name(), tools = tools.len(), "Parsed model reply");
        Self {
            message,
            tools,
            dropped_tools,
        }
    }

    fn plain(text: &str) -> Self {
        Self {
            message: text.trim().to_string(),
            tools: Vec::new(),
            dropped_tools: 0,
        }
    }
}

/// Collects tool entries from the reply object.
///
/// A bare tool object (one naming a tool at the top level) counts as a single
/// entry.
fn tool_entries(object: &Map<String, JsonValue>) -> Vec<JsonValue> {
    for field in TOOL_FIELDS {
        match object.get(*field) {
            Some(JsonValue::Array(items)) => return items.clone(),
            Some(item @ JsonValue::Object(_)) => return vec![item.clone()],
            _ => {}
        }
    }
    if ["tool", "toolName", "function"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return vec![JsonValue::Object(object.clone())];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_reply() {
        let reply = ModelReply::parse(
            r#"{"message":"Booked.","tools":[{"name":"create_event","parameters":{"title":"Lunch","start":"a","end":"b"}}]}"#,
        );
        assert_eq!(reply.message, "Booked.");
        assert_eq!(reply.tools.len(), 1);
        assert_eq!(reply.tools[0].tool_name, "create_event");
    }

    #[test]
    fn fenced_reply_with_alternate_fields() {
        let reply = ModelReply::parse(
            "```json\n{\"response\":\"Removing it.\",\"tool_calls\":[{\"tool\":\"delete_event\",\"args\":{\"event_id\":\"e1\"}}]}\n```",
        );
        assert_eq!(reply.message, "Removing it.");
        assert_eq!(reply.tools[0].parameters["event_id"], "e1");
    }

    #[test]
    fn plain_text_reply() {
        let reply = ModelReply::parse("  Sure, what time works for you?  ");
        assert_eq!(reply.message, "Sure, what time works for you?");
        assert!(reply.tools.is_empty());
    }

    #[test]
    fn unrelated_json_is_plain_text() {
        let text = r#"The event looks like {"id": 3}."#;
        let reply = ModelReply::parse(text);
        assert_eq!(reply.message, text);
        assert!(reply.tools.is_empty());
    }

    #[test]
    fn malformed_tools_are_dropped() {
        let reply = ModelReply::parse(
            r#"{"message":"ok","tools":[{"parameters":{}},{"name":"list_events"}]}"#,
        );
        assert_eq!(reply.tools.len(), 1);
        assert_eq!(reply.dropped_tools, 1);
    }

    #[test]
    fn bare_tool_object() {
        let reply = ModelReply::parse(r#"{"tool":"list_events","search":"dentist"}"#);
        assert_eq!(reply.tools.len(), 1);
        assert_eq!(reply.tools[0].parameters["search"], "dentist");
    }
}
