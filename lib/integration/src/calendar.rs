//! Calendar transport seam and event types.
//!
//! Tool parameters arrive as loose JSON maps. The `from_parameters`
//! constructors here turn them into typed requests, accepting the handful of
//! shapes models tend to produce (`{"dateTime": ..}` objects for times,
//! comma-separated attendee strings, bare reminder minutes).

use crate::error::{CalendarError, ParameterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use slotwise_session::Credentials;

/// Upper bound on events returned by one list call.
pub const MAX_LIST_RESULTS: u32 = 250;

/// Default number of events returned by a list call.
pub const DEFAULT_LIST_RESULTS: u32 = 25;

/// A calendar event as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    /// Reminder offsets in minutes before the start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<u32>,
}

/// Filter for listing events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Lower bound (RFC 3339) on event end.
    pub start: Option<String>,
    /// Upper bound (RFC 3339) on event start.
    pub end: Option<String>,
    /// Free-text search term.
    pub search: Option<String>,
    pub max_results: u32,
}

impl EventQuery {
    /// Reads a query from `list_events` parameters.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError` if a field has the wrong type.
    pub fn from_parameters(parameters: &Map<String, JsonValue>) -> Result<Self, ParameterError> {
        let max_results = match parameters.get("max_results") {
            None | Some(JsonValue::Null) => DEFAULT_LIST_RESULTS,
            Some(JsonValue::Number(n)) => n
                .as_u64()
                .map(|v| v.min(u64::from(MAX_LIST_RESULTS)) as u32)
                .ok_or_else(|| ParameterError::new("max_results", "a positive integer"))?,
            Some(JsonValue::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ParameterError::new("max_results", "a positive integer"))?,
            Some(_) => return Err(ParameterError::new("max_results", "a positive integer")),
        };

        Ok(Self {
            start: time_field(parameters, "start")?,
            end: time_field(parameters, "end")?,
            search: text_field(parameters, "search")?,
            max_results: max_results.clamp(1, MAX_LIST_RESULTS),
        })
    }
}

/// A new event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub start: String,
    pub end: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub reminders: Vec<u32>,
}

impl EventDraft {
    /// Reads a draft from `create_event` parameters.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError` if a field has the wrong type or a required
    /// field is absent.
    pub fn from_parameters(parameters: &Map<String, JsonValue>) -> Result<Self, ParameterError> {
        Ok(Self {
            title: text_field(parameters, "title")?
                .ok_or_else(|| ParameterError::new("title", "a non-empty string"))?,
            start: time_field(parameters, "start")?
                .ok_or_else(|| ParameterError::new("start", "a timestamp"))?,
            end: time_field(parameters, "end")?
                .ok_or_else(|| ParameterError::new("end", "a timestamp"))?,
            description: text_field(parameters, "description")?,
            location: text_field(parameters, "location")?,
            attendees: attendees_field(parameters)?.unwrap_or_default(),
            reminders: reminders_field(parameters)?.unwrap_or_default(),
        })
    }
}

/// A partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Option<Vec<String>>,
    pub reminders: Option<Vec<u32>>,
}

impl EventPatch {
    /// Reads a patch from `update_event` parameters.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError` if a field has the wrong type.
    pub fn from_parameters(parameters: &Map<String, JsonValue>) -> Result<Self, ParameterError> {
        Ok(Self {
            title: text_field(parameters, "title")?,
            start: time_field(parameters, "start")?,
            end: time_field(parameters, "end")?,
            description: text_field(parameters, "description")?,
            location: text_field(parameters, "location")?,
            attendees: attendees_field(parameters)?,
            reminders: reminders_field(parameters)?,
        })
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Calendar provider operations.
///
/// Credentials are passed by value per call; transports hold no session
/// state.
#[async_trait]
pub trait CalendarTransport: Send + Sync {
    /// Lists events matching the query, ordered by start.
    async fn list_events(
        &self,
        credentials: &Credentials,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;

    /// Creates an event.
    async fn create_event(
        &self,
        credentials: &Credentials,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarError>;

    /// Applies a partial update to an event.
    async fn update_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError>;

    /// Deletes an event. A missing event is reported as `NotFound`.
    async fn delete_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
    ) -> Result<(), CalendarError>;
}

fn text_field(
    parameters: &Map<String, JsonValue>,
    field: &str,
) -> Result<Option<String>, ParameterError> {
    match parameters.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ParameterError::new(field, "a string")),
    }
}

fn time_field(
    parameters: &Map<String, JsonValue>,
    field: &str,
) -> Result<Option<String>, ParameterError> {
    match parameters.get(field) {
        Some(JsonValue::Object(object)) => ["dateTime", "date_time", "date"]
            .iter()
            .find_map(|key| object.get(*key).and_then(JsonValue::as_str))
            .map(|s| Some(s.trim().to_string()))
            .ok_or_else(|| ParameterError::new(field, "a timestamp")),
        _ => text_field(parameters, field)
            .map_err(|_| ParameterError::new(field, "a timestamp")),
    }
}

fn attendees_field(
    parameters: &Map<String, JsonValue>,
) -> Result<Option<Vec<String>>, ParameterError> {
    let invalid = || ParameterError::new("attendees", "a list of email addresses");
    match parameters.get("attendees") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s.trim().to_string()),
                JsonValue::Object(o) => o
                    .get("email")
                    .and_then(JsonValue::as_str)
                    .map(|s| s.trim().to_string())
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid()),
    }
}

fn reminders_field(
    parameters: &Map<String, JsonValue>,
) -> Result<Option<Vec<u32>>, ParameterError> {
    let invalid = || ParameterError::new("reminders", "a list of minutes");
    let minutes = |value: &JsonValue| -> Result<u32, ParameterError> {
        match value {
            JsonValue::Number(n) => n
                .as_u64()
                .and_then(|m| u32::try_from(m).ok())
                .ok_or_else(invalid),
            JsonValue::String(s) => s.trim().parse().map_err(|_| invalid()),
            JsonValue::Object(o) => o
                .get("minutes")
                .and_then(JsonValue::as_u64)
                .and_then(|m| u32::try_from(m).ok())
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    };
    match parameters.get("reminders") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(minutes)
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(value) => minutes(value).map(|m| Some(vec![m])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn out_of_range_reminders_are_rejected() {
        for reminders in [json!([4_294_967_296u64]), json!({"minutes": 4_294_967_296u64})] {
            let err = EventPatch::from_parameters(&params(json!({ "reminders": reminders })))
                .unwrap_err();
            assert_eq!(err, ParameterError::new("reminders", "a list of minutes"));
        }
    }

    #[test]
    fn draft_accepts_loose_shapes() {
        let draft = EventDraft::from_parameters(&params(json!({
            "title": " Standup ",
            "start": {"dateTime": "2026-03-02T09:00:00+01:00"},
            "end": "2026-03-02T09:15:00+01:00",
            "attendees": "a@example.com, b@example.com",
            "reminders": [10, {"minutes": 30}, "5"],
        })))
        .expect("valid draft");

        assert_eq!(draft.title, "Standup");
        assert_eq!(draft.start, "2026-03-02T09:00:00+01:00");
        assert_eq!(draft.attendees, vec!["a@example.com", "b@example.com"]);
        assert_eq!(draft.reminders, vec![10, 30, 5]);
        assert_eq!(draft.description, None);
    }

    #[test]
    fn draft_rejects_wrong_types() {
        let err = EventDraft::from_parameters(&params(json!({
            "title": "x", "start": "a", "end": "b", "attendees": 7,
        })))
        .expect_err("attendees must be a list");
        assert_eq!(err.field, "attendees");
    }

    #[test]
    fn patch_only_carries_given_fields() {
        let patch = EventPatch::from_parameters(&params(json!({
            "event_id": "e1", "location": "Room 4",
        })))
        .expect("valid patch");
        assert_eq!(patch.location.as_deref(), Some("Room 4"));
        assert_eq!(patch.title, None);
        assert!(!patch.is_empty());

        let empty = EventPatch::from_parameters(&params(json!({"event_id": "e1"})))
            .expect("valid patch");
        assert!(empty.is_empty());
    }

    #[test]
    fn query_clamps_max_results() {
        let query = EventQuery::from_parameters(&params(json!({"max_results": 10_000})))
            .expect("valid query");
        assert_eq!(query.max_results, MAX_LIST_RESULTS);

        let query = EventQuery::from_parameters(&Map::new()).expect("valid query");
        assert_eq!(query.max_results, DEFAULT_LIST_RESULTS);
        assert_eq!(query.search, None);
    }
}
