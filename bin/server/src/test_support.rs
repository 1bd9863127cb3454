//! Fakes shared by the server tests.

use crate::coordinator::Coordinator;
use crate::state::{AppState, CookieSettings};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use slotwise_ai::{
    CompletionBackend, CompletionRequest, CompletionResponse, Compactor, ContextLimits,
    FallbackConfig, FallbackOrchestrator, LlmError, ModelRoster, TokenUsage,
};
use slotwise_conversation::ToolCatalog;
use slotwise_integration::{
    CalendarError, CalendarEvent, CalendarTransport, DispatchEngine, EventDraft, EventPatch,
    EventQuery, RetryPolicy,
};
use slotwise_session::{
    Credentials, MemoryStore, RefreshError, SessionManager, SessionManagerConfig, TokenEndpoint,
    TokenGrant, ValidSession,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Completion backend that plays back canned replies and records system
/// prompts.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    systems: Arc<Mutex<Vec<String>>>,
    request_sizes: Arc<Mutex<Vec<usize>>>,
    delay: Option<Duration>,
    failing: bool,
}

impl ScriptedModel {
    pub fn replying<const N: usize>(replies: [&str; N]) -> Self {
        Self {
            replies: Arc::new(Mutex::new(
                replies.iter().map(|r| (*r).to_string()).collect(),
            )),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Waits this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn systems(&self) -> Vec<String> {
        self.systems.lock().expect("lock").clone()
    }

    /// Number of messages in each request, in call order.
    pub fn request_sizes(&self) -> Vec<usize> {
        self.request_sizes.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedModel {
    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        if self.failing {
            return Err(LlmError::Http {
                status: 500,
                body: "internal".to_string(),
            });
        }
        if let Some(system) = &request.system {
            self.systems.lock().expect("lock").push(system.clone());
        }
        self.request_sizes
            .lock()
            .expect("lock")
            .push(request.messages.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| "ok".to_string());
        Ok(CompletionResponse {
            content,
            model: model.to_string(),
            usage: TokenUsage::default(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["primary".to_string()])
    }
}

/// Calendar that records calls.
#[derive(Default)]
pub struct FakeCalendar {
    calls: Mutex<Vec<String>>,
}

impl FakeCalendar {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }
}

fn event(id: &str, title: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        title: title.to_string(),
        start: "2026-03-02T09:00:00Z".to_string(),
        end: "2026-03-02T10:00:00Z".to_string(),
        description: None,
        location: None,
        attendees: Vec::new(),
        reminders: Vec::new(),
    }
}

#[async_trait]
impl CalendarTransport for FakeCalendar {
    async fn list_events(
        &self,
        _credentials: &Credentials,
        _query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.record("list".to_string());
        Ok(vec![event("e1", "Dentist")])
    }

    async fn create_event(
        &self,
        _credentials: &Credentials,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarError> {
        self.record(format!("create:{}", draft.title));
        Ok(event("new", &draft.title))
    }

    async fn update_event(
        &self,
        _credentials: &Credentials,
        event_id: &str,
        _patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError> {
        self.record(format!("update:{event_id}"));
        Ok(event(event_id, "Dentist"))
    }

    async fn delete_event(
        &self,
        _credentials: &Credentials,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        self.record(format!("delete:{event_id}"));
        Ok(())
    }
}

/// Token endpoint that accepts any code except `bad`.
pub struct FakeTokens;

#[async_trait]
impl TokenEndpoint for FakeTokens {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, RefreshError> {
        if code == "bad" {
            return Err(RefreshError::Rejected {
                reason: "invalid_grant".to_string(),
            });
        }
        Ok(TokenGrant {
            access_token: format!("access-{code}"),
            refresh_token: Some("refresh".to_string()),
            expires_in_seconds: Some(3600),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        Err(RefreshError::Rejected {
            reason: "invalid_grant".to_string(),
        })
    }
}

/// A coordinator wired to fakes.
pub struct TestHarness {
    pub sessions: Arc<SessionManager>,
    pub calendar: Arc<FakeCalendar>,
    pub coordinator: Arc<Coordinator>,
}

impl TestHarness {
    pub async fn new(model: ScriptedModel) -> Self {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeTokens),
            SessionManagerConfig::default(),
        ));
        let calendar = Arc::new(FakeCalendar::default());
        let backend: Arc<dyn CompletionBackend> = Arc::new(model);
        let compactor = Arc::new(Compactor::new(backend.clone(), ContextLimits::default()));
        let orchestrator = FallbackOrchestrator::new(
            backend,
            ModelRoster::new("primary", Vec::new()),
            compactor.clone(),
            FallbackConfig::default(),
        );
        let dispatch = DispatchEngine::new(ToolCatalog::calendar(), calendar.clone())
            .with_retry_policy(RetryPolicy::default().without_jitter());
        let coordinator = Arc::new(Coordinator::new(
            sessions.clone(),
            compactor,
            orchestrator,
            dispatch,
        ));
        Self {
            sessions,
            calendar,
            coordinator,
        }
    }

    /// Creates and validates a fresh session.
    pub async fn session(&self) -> ValidSession {
        let id = self
            .sessions
            .create(Credentials::new(
                "token",
                Some("refresh".to_string()),
                Utc::now() + ChronoDuration::hours(1),
            ))
            .await
            .expect("create session");
        self.sessions.validate(&id).await.expect("valid session")
    }

    /// Creates a session whose token has already expired, as a request that
    /// validated it just before expiry would still hold it.
    pub async fn expired_session(&self) -> ValidSession {
        let credentials = Credentials::new(
            "token",
            Some("refresh".to_string()),
            Utc::now() - ChronoDuration::minutes(1),
        );
        let id = self
            .sessions
            .create(credentials.clone())
            .await
            .expect("create session");
        ValidSession {
            id,
            credentials,
            created_at: Utc::now(),
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.coordinator.clone(),
            CookieSettings {
                secure: false,
                max_age_days: 1,
            },
        ))
    }
}
