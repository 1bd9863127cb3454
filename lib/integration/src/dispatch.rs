//! Tool dispatch and confirmation.
//!
//! The engine validates tool invocations against the catalog, holds
//! confirmation-gated invocations until the user confirms them, and runs
//! everything else against the calendar transport behind the rate-limit
//! ledger and the retry policy.

use crate::calendar::{CalendarTransport, EventDraft, EventPatch, EventQuery};
use crate::error::{CalendarError, ParameterError};
use crate::rate_limit::RateLimitLedger;
use crate::retry::RetryPolicy;
use serde_json::{Value as JsonValue, json};
use slotwise_conversation::{ToolCatalog, ToolError, ToolInvocation, ToolResult, ToolSpec};
use slotwise_core::SessionId;
use slotwise_session::ValidSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A typed calendar request built from a validated invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CalendarRequest {
    List(EventQuery),
    Create(EventDraft),
    Update { event_id: String, patch: EventPatch },
    Delete { event_id: String },
}

impl CalendarRequest {
    fn from_invocation(invocation: &ToolInvocation) -> Result<Self, DispatchRejection> {
        let parameters = &invocation.parameters;
        let event_id = || {
            parameters
                .get("event_id")
                .and_then(JsonValue::as_str)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ParameterError::new("event_id", "a string"))
        };
        let request = match invocation.tool_name.as_str() {
            "list_events" => Self::List(EventQuery::from_parameters(parameters)?),
            "create_event" => Self::Create(EventDraft::from_parameters(parameters)?),
            "update_event" => Self::Update {
                event_id: event_id()?,
                patch: EventPatch::from_parameters(parameters)?,
            },
            "delete_event" => Self::Delete {
                event_id: event_id()?,
            },
            other => {
                return Err(DispatchRejection::Tool(ToolError::UnknownTool {
                    name: other.to_string(),
                }));
            }
        };
        Ok(request)
    }
}

/// Why an invocation was refused before reaching the transport.
#[derive(Debug)]
enum DispatchRejection {
    Tool(ToolError),
    Parameter(ParameterError),
}

impl From<ParameterError> for DispatchRejection {
    fn from(e: ParameterError) -> Self {
        Self::Parameter(e)
    }
}

impl DispatchRejection {
    fn into_result(self) -> ToolResult {
        match self {
            Self::Tool(e) => ToolResult::failure(e.to_string()),
            Self::Parameter(e) => ToolResult::failure(format!("Invalid parameters: {e}")),
        }
    }
}

/// Validates, gates and executes tool invocations.
pub struct DispatchEngine {
    catalog: ToolCatalog,
    transport: Arc<dyn CalendarTransport>,
    ledger: RateLimitLedger,
    retry: RetryPolicy,
    /// Invocations awaiting confirmation, per session, in arrival order.
    pending: Mutex<HashMap<SessionId, Vec<ToolInvocation>>>,
}

impl DispatchEngine {
    /// Creates an engine with the default ledger and retry policy.
    #[must_use]
    pub fn new(catalog: ToolCatalog, transport: Arc<dyn CalendarTransport>) -> Self {
        Self {
            catalog,
            transport,
            ledger: RateLimitLedger::default(),
            retry: RetryPolicy::default(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Uses a shared rate-limit ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: RateLimitLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Sets the retry policy for calendar calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Dispatches one invocation.
    ///
    /// Confirmation-gated tools are registered as pending and not executed.
    #[tracing::instrument(skip_all, fields(session_id = %session.id, tool = %invocation.tool_name))]
    pub async fn dispatch(&self, invocation: ToolInvocation, session: &ValidSession) -> ToolResult {
        let (spec, request) = match self.check(&invocation) {
            Ok(checked) => checked,
            Err(rejection) => {
                tracing::warn!(?rejection, "Rejected tool invocation");
                return rejection.into_result();
            }
        };

        if spec.requires_confirmation {
            self.hold(&session.id, invocation.clone());
            tracing::info!("Tool held for confirmation");
            return ToolResult::pending(invocation);
        }

        self.execute(spec, request, session).await
    }

    /// Dispatches invocations one at a time, in order.
    ///
    /// A failed invocation does not stop the ones after it.
    pub async fn dispatch_all(
        &self,
        invocations: Vec<ToolInvocation>,
        session: &ValidSession,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            results.push(self.dispatch(invocation, session).await);
        }
        results
    }

    /// Executes a pending invocation.
    ///
    /// Only an invocation pending for this session with the same tool and
    /// parameters is executed; it is removed from the pending set first.
    #[tracing::instrument(skip_all, fields(session_id = %session.id, tool = %invocation.tool_name))]
    pub async fn confirm(&self, invocation: &ToolInvocation, session: &ValidSession) -> ToolResult {
        if !self.take_pending(&session.id, invocation) {
            tracing::warn!("Confirmation for an invocation that is not pending");
            return ToolResult::failure(format!(
                "There is no pending {} to confirm",
                invocation.tool_name
            ));
        }

        match self.check(invocation) {
            Ok((spec, request)) => {
                tracing::info!("Executing confirmed tool");
                self.execute(spec, request, session).await
            }
            Err(rejection) => rejection.into_result(),
        }
    }

    /// Discards a pending invocation without executing it.
    #[must_use = "the result reports whether anything was pending"]
    pub fn cancel(&self, invocation: &ToolInvocation, session_id: &SessionId) -> ToolResult {
        if self.take_pending(session_id, invocation) {
            tracing::info!(session_id = %session_id, tool = %invocation.tool_name, "Cancelled pending tool");
            ToolResult::success(format!("Cancelled {}", invocation.tool_name), None)
        } else {
            ToolResult::failure(format!(
                "There is no pending {} to cancel",
                invocation.tool_name
            ))
        }
    }

    /// Returns the invocations pending for a session.
    #[must_use]
    pub fn pending(&self, session_id: &SessionId) -> Vec<ToolInvocation> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops all state held for a session.
    pub fn forget_session(&self, session_id: &SessionId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        self.ledger.forget_session(session_id);
    }

    fn check(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<(&ToolSpec, CalendarRequest), DispatchRejection> {
        let spec = self
            .catalog
            .get(&invocation.tool_name)
            .ok_or_else(|| {
                DispatchRejection::Tool(ToolError::UnknownTool {
                    name: invocation.tool_name.clone(),
                })
            })?;

        let missing = spec.missing_required(&invocation.parameters);
        if !missing.is_empty() {
            return Err(DispatchRejection::Tool(ToolError::InvalidParameters {
                name: invocation.tool_name.clone(),
                missing,
            }));
        }

        Ok((spec, CalendarRequest::from_invocation(invocation)?))
    }

    fn hold(&self, session_id: &SessionId, invocation: ToolInvocation) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = pending.entry(session_id.clone()).or_default();
        if !entries.contains(&invocation) {
            entries.push(invocation);
        }
    }

    fn take_pending(&self, session_id: &SessionId, invocation: &ToolInvocation) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = pending.get_mut(session_id) else {
            return false;
        };
        let Some(index) = entries.iter().position(|p| p == invocation) else {
            return false;
        };
        entries.remove(index);
        if entries.is_empty() {
            pending.remove(session_id);
        }
        true
    }

    async fn execute(
        &self,
        spec: &ToolSpec,
        request: CalendarRequest,
        session: &ValidSession,
    ) -> ToolResult {
        if matches!(&request, CalendarRequest::Update { patch, .. } if patch.is_empty()) {
            return ToolResult::failure("Nothing to update");
        }
        self.ledger.acquire(&session.id, spec.category).await;

        let transport = self.transport.as_ref();
        let credentials = &session.credentials;

        let result = match &request {
            CalendarRequest::List(query) => self
                .retry
                .run(spec.name, move || transport.list_events(credentials, query))
                .await
                .map(|events| {
                    let message = match events.len() {
                        0 => "No events found".to_string(),
                        1 => "Found 1 event".to_string(),
                        n => format!("Found {n} events"),
                    };
                    ToolResult::success(message, serde_json::to_value(&events).ok())
                }),
            CalendarRequest::Create(draft) => self
                .retry
                .run(spec.name, move || transport.create_event(credentials, draft))
                .await
                .map(|event| {
                    ToolResult::success(
                        format!("Created \"{}\"", event.title),
                        serde_json::to_value(&event).ok(),
                    )
                }),
            CalendarRequest::Update { event_id, patch } => self
                .retry
                .run(spec.name, move || {
                    transport.update_event(credentials, event_id, patch)
                })
                .await
                .map(|event| {
                    ToolResult::success(
                        format!("Updated \"{}\"", event.title),
                        serde_json::to_value(&event).ok(),
                    )
                }),
            CalendarRequest::Delete { event_id } => {
                match self
                    .retry
                    .run(spec.name, move || transport.delete_event(credentials, event_id))
                    .await
                {
                    Ok(()) => Ok(ToolResult::success(
                        "Deleted the event",
                        Some(json!({ "eventId": event_id })),
                    )),
                    Err(CalendarError::NotFound { .. }) => {
                        tracing::info!(event_id = %event_id, "Event already absent");
                        Ok(ToolResult::success(
                            "The event was already deleted",
                            Some(json!({ "eventId": event_id, "alreadyDeleted": true })),
                        ))
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(result) => {
                tracing::info!(success = result.success, "Tool executed");
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tool failed");
                ToolResult::failure(e.user_message())
            }
        }
    }
}
