//! Tool catalog and invocation types.
//!
//! The catalog is the static list of calendar operations the model may
//! request. Models describe those requests in several loose shapes; they are
//! normalized once, here, into a canonical [`ToolInvocation`].

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Keys a model may use to name the tool.
const NAME_KEYS: &[&str] = &["name", "tool", "toolName", "function"];

/// Keys a model may nest the parameters under.
const PARAMETER_KEYS: &[&str] = &["parameters", "params", "arguments", "args"];

/// Category of a tool, used for rate limiting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Reads calendar state.
    Read,
    /// Creates or modifies events.
    Write,
    /// Deletes events.
    Delete,
}

impl ToolCategory {
    /// Returns the category name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static catalog entry describing one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: &'static str,
    /// Human-readable description, shown to the model.
    pub description: &'static str,
    /// Parameters that must be present and non-empty.
    pub required: &'static [&'static str],
    /// Parameters that may be present.
    pub optional: &'static [&'static str],
    /// Whether a human must confirm before execution.
    pub requires_confirmation: bool,
    /// Tool category.
    pub category: ToolCategory,
}

impl ToolSpec {
    /// Returns the required parameters absent from `parameters`.
    ///
    /// Null values and blank strings count as absent.
    #[must_use]
    pub fn missing_required(&self, parameters: &Map<String, JsonValue>) -> Vec<String> {
        self.required
            .iter()
            .filter(|field| match parameters.get(**field) {
                None | Some(JsonValue::Null) => true,
                Some(JsonValue::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| (*field).to_string())
            .collect()
    }
}

const EVENT_FIELDS: &[&str] = &[
    "title",
    "start",
    "end",
    "description",
    "location",
    "attendees",
    "reminders",
];

/// The calendar tools exposed to the model.
pub const CALENDAR_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_events",
        description: "List calendar events in a time range, optionally filtered by a search term.",
        required: &[],
        optional: &["start", "end", "search", "max_results"],
        requires_confirmation: false,
        category: ToolCategory::Read,
    },
    ToolSpec {
        name: "create_event",
        description: "Create a calendar event.",
        required: &["title", "start", "end"],
        optional: &["description", "location", "attendees", "reminders"],
        requires_confirmation: false,
        category: ToolCategory::Write,
    },
    ToolSpec {
        name: "update_event",
        description: "Change fields of an existing calendar event. Only the given fields change.",
        required: &["event_id"],
        optional: EVENT_FIELDS,
        requires_confirmation: true,
        category: ToolCategory::Write,
    },
    ToolSpec {
        name: "delete_event",
        description: "Delete a calendar event.",
        required: &["event_id"],
        optional: &[],
        requires_confirmation: true,
        category: ToolCategory::Delete,
    },
];

/// Catalog of available tools.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    specs: Vec<ToolSpec>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::calendar()
    }
}

impl ToolCatalog {
    /// Creates the calendar catalog.
    #[must_use]
    pub fn calendar() -> Self {
        Self {
            specs: CALENDAR_TOOLS.to_vec(),
        }
    }

    /// Gets a tool spec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// Renders the catalog as the tool section of a system prompt.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for spec in &self.specs {
            out.push_str(&format!("- {}: {}", spec.name, spec.description));
            if !spec.required.is_empty() {
                out.push_str(&format!(" Required: {}.", spec.required.join(", ")));
            }
            if !spec.optional.is_empty() {
                out.push_str(&format!(" Optional: {}.", spec.optional.join(", ")));
            }
            if spec.requires_confirmation {
                out.push_str(" Needs user confirmation.");
            }
            out.push('\n');
        }
        out
    }
}

/// A canonical request to run one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the tool to run.
    #[serde(rename = "name")]
    pub tool_name: String,
    /// Tool parameters.
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
}

impl ToolInvocation {
    /// Creates an invocation.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, JsonValue>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// Normalizes a loosely shaped tool request emitted by a model.
    ///
    /// The tool may be named by any of `name`, `tool`, `toolName` or
    /// `function` (including an OpenAI-style `{"function": {"name", "arguments"}}`
    /// object). Parameters may be nested under `parameters`, `params`,
    /// `arguments` or `args`, possibly as a JSON-encoded string, or spread at
    /// the top level.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Malformed` if the value is not an object or names
    /// no tool.
    pub fn from_raw(raw: &JsonValue) -> Result<Self, ToolError> {
        let object = raw.as_object().ok_or_else(|| ToolError::Malformed {
            reason: "tool request is not an object".to_string(),
        })?;

        // OpenAI-style function object carries its own name and arguments.
        if let Some(function) = object.get("function").and_then(JsonValue::as_object) {
            if let Some(name) = function.get("name").and_then(JsonValue::as_str) {
                let parameters = nested_parameters(function).unwrap_or_default();
                return Ok(Self::new(name, parameters));
            }
        }

        let name = NAME_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(JsonValue::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ToolError::Malformed {
                reason: "tool request names no tool".to_string(),
            })?;

        let parameters = nested_parameters(object).unwrap_or_else(|| {
            object
                .iter()
                .filter(|(key, _)| !NAME_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        });

        Ok(Self::new(name, parameters))
    }
}

fn nested_parameters(object: &Map<String, JsonValue>) -> Option<Map<String, JsonValue>> {
    PARAMETER_KEYS.iter().find_map(|key| match object.get(*key)? {
        JsonValue::Object(map) => Some(map.clone()),
        JsonValue::String(encoded) => match serde_json::from_str(encoded) {
            Ok(JsonValue::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    })
}

/// Result of dispatching one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the invocation succeeded (or was accepted as pending).
    pub success: bool,
    /// Result data, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    /// Human-readable outcome.
    pub message: String,
    /// Whether the invocation awaits confirmation.
    #[serde(default)]
    pub requires_confirmation: bool,
    /// The invocation held for confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_invocation: Option<ToolInvocation>,
}

impl ToolResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>, data: Option<JsonValue>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
            requires_confirmation: false,
            pending_invocation: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            requires_confirmation: false,
            pending_invocation: None,
        }
    }

    /// Creates a result for an invocation held for confirmation.
    #[must_use]
    pub fn pending(invocation: ToolInvocation) -> Self {
        Self {
            success: true,
            data: None,
            message: format!("{} is waiting for your confirmation", invocation.tool_name),
            requires_confirmation: true,
            pending_invocation: Some(invocation),
        }
    }
}
