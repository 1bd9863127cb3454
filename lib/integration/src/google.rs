//! Google Calendar v3 HTTP transport.

use crate::calendar::{CalendarEvent, CalendarTransport, EventDraft, EventPatch, EventQuery};
use crate::error::CalendarError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use slotwise_session::Credentials;

/// Default Google Calendar API base URL.
pub const GOOGLE_CALENDAR_URL: &str = "https://www.googleapis.com/calendar/v3";

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Calendar transport for the Google Calendar v3 events API.
#[derive(Clone)]
pub struct GoogleCalendarClient {
    base_url: Url,
    calendar_id: String,
    http: reqwest::Client,
}

impl GoogleCalendarClient {
    /// Creates a client for the user's primary calendar.
    ///
    /// # Errors
    ///
    /// Returns `CalendarError::InvalidConfig` if the base URL is invalid or
    /// the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, CalendarError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            CalendarError::InvalidConfig {
                reason: format!("invalid calendar URL: {e}"),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CalendarError::InvalidConfig {
                reason: format!("calendar URL cannot be a base: {base_url}"),
            });
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CalendarError::InvalidConfig {
                reason: format!("HTTP client error: {e}"),
            })?;
        Ok(Self {
            base_url,
            calendar_id: "primary".to_string(),
            http,
        })
    }

    /// Targets a calendar other than `primary`.
    #[must_use]
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    fn events_url(&self, event_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(["calendars", self.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        url
    }
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    #[serde(default)]
    reminders: Option<Reminders>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl EventTime {
    fn into_string(self) -> String {
        self.date_time.or(self.date).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Attendee {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct Reminders {
    #[serde(default)]
    overrides: Vec<ReminderOverride>,
}

#[derive(Deserialize)]
struct ReminderOverride {
    minutes: u32,
}

impl From<GoogleEvent> for CalendarEvent {
    fn from(event: GoogleEvent) -> Self {
        Self {
            id: event.id,
            title: event.summary.unwrap_or_default(),
            start: event.start.map(EventTime::into_string).unwrap_or_default(),
            end: event.end.map(EventTime::into_string).unwrap_or_default(),
            description: event.description,
            location: event.location,
            attendees: event
                .attendees
                .into_iter()
                .filter_map(|a| a.email)
                .collect(),
            reminders: event
                .reminders
                .map(|r| r.overrides.into_iter().map(|o| o.minutes).collect())
                .unwrap_or_default(),
        }
    }
}

/// A bare `YYYY-MM-DD` value is an all-day date.
fn time_json(value: &str) -> JsonValue {
    if value.len() == 10 && !value.contains('T') {
        json!({ "date": value })
    } else {
        json!({ "dateTime": value })
    }
}

fn attendees_json(attendees: &[String]) -> JsonValue {
    JsonValue::Array(
        attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect(),
    )
}

fn reminders_json(minutes: &[u32]) -> JsonValue {
    json!({
        "useDefault": false,
        "overrides": minutes
            .iter()
            .map(|m| json!({ "method": "popup", "minutes": m }))
            .collect::<Vec<_>>(),
    })
}

fn draft_body(draft: &EventDraft) -> JsonValue {
    let mut body = Map::new();
    body.insert("summary".into(), json!(draft.title));
    body.insert("start".into(), time_json(&draft.start));
    body.insert("end".into(), time_json(&draft.end));
    if let Some(description) = &draft.description {
        body.insert("description".into(), json!(description));
    }
    if let Some(location) = &draft.location {
        body.insert("location".into(), json!(location));
    }
    if !draft.attendees.is_empty() {
        body.insert("attendees".into(), attendees_json(&draft.attendees));
    }
    if !draft.reminders.is_empty() {
        body.insert("reminders".into(), reminders_json(&draft.reminders));
    }
    JsonValue::Object(body)
}

fn patch_body(patch: &EventPatch) -> JsonValue {
    let mut body = Map::new();
    if let Some(title) = &patch.title {
        body.insert("summary".into(), json!(title));
    }
    if let Some(start) = &patch.start {
        body.insert("start".into(), time_json(start));
    }
    if let Some(end) = &patch.end {
        body.insert("end".into(), time_json(end));
    }
    if let Some(description) = &patch.description {
        body.insert("description".into(), json!(description));
    }
    if let Some(location) = &patch.location {
        body.insert("location".into(), json!(location));
    }
    if let Some(attendees) = &patch.attendees {
        body.insert("attendees".into(), attendees_json(attendees));
    }
    if let Some(reminders) = &patch.reminders {
        body.insert("reminders".into(), reminders_json(reminders));
    }
    JsonValue::Object(body)
}

fn transport_error(e: &reqwest::Error) -> CalendarError {
    if e.is_timeout() {
        CalendarError::Timeout
    } else {
        CalendarError::Connection {
            reason: e.to_string(),
        }
    }
}

/// Maps a non-success response onto a [`CalendarError`].
///
/// Google reports quota exhaustion as either 429 or a 403 whose body names a
/// rate-limit reason.
fn status_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
    event_id: Option<&str>,
) -> CalendarError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    match status.as_u16() {
        404 | 410 => CalendarError::NotFound {
            event_id: event_id.unwrap_or_default().to_string(),
        },
        429 => CalendarError::RateLimited { retry_after_secs },
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            CalendarError::RateLimited { retry_after_secs }
        }
        401 => CalendarError::Unauthorized,
        code if status.is_server_error() => CalendarError::Server { status: code, body },
        code => CalendarError::Rejected { status: code, body },
    }
}

async fn check(
    response: reqwest::Response,
    event_id: Option<&str>,
) -> Result<reqwest::Response, CalendarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, retry_after_secs, body, event_id))
}

async fn read_event(response: reqwest::Response) -> Result<CalendarEvent, CalendarError> {
    response
        .json::<GoogleEvent>()
        .await
        .map(CalendarEvent::from)
        .map_err(|e| CalendarError::InvalidResponse {
            reason: e.to_string(),
        })
}

#[async_trait]
impl CalendarTransport for GoogleCalendarClient {
    #[tracing::instrument(skip(self, credentials, query), fields(max_results = query.max_results))]
    async fn list_events(
        &self,
        credentials: &Credentials,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let time_min = query
            .start
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let mut params = vec![
            ("timeMin", time_min),
            ("maxResults", query.max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(end) = &query.end {
            params.push(("timeMax", end.clone()));
        }
        if let Some(search) = &query.search {
            params.push(("q", search.clone()));
        }

        let response = self
            .http
            .get(self.events_url(None))
            .bearer_auth(&credentials.access_token)
            .query(&params)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let list: EventList = check(response, None)
            .await?
            .json()
            .await
            .map_err(|e| CalendarError::InvalidResponse {
                reason: e.to_string(),
            })?;

        tracing::debug!(events = list.items.len(), "Listed calendar events");
        Ok(list.items.into_iter().map(CalendarEvent::from).collect())
    }

    #[tracing::instrument(skip(self, credentials, draft))]
    async fn create_event(
        &self,
        credentials: &Credentials,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarError> {
        let response = self
            .http
            .post(self.events_url(None))
            .bearer_auth(&credentials.access_token)
            .json(&draft_body(draft))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        read_event(check(response, None).await?).await
    }

    #[tracing::instrument(skip(self, credentials, patch))]
    async fn update_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError> {
        let response = self
            .http
            .patch(self.events_url(Some(event_id)))
            .bearer_auth(&credentials.access_token)
            .json(&patch_body(patch))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        read_event(check(response, Some(event_id)).await?).await
    }

    #[tracing::instrument(skip(self, credentials))]
    async fn delete_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let response = self
            .http
            .delete(self.events_url(Some(event_id)))
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        check(response, Some(event_id)).await?;
        Ok(())
    }
}
