//! Request coordinator.
//!
//! Turns one user message into one orchestration pass: build the system
//! prompt, keep the history within limits, call the fallback orchestrator,
//! parse the reply and dispatch the requested tools in order.

use serde::Serialize;
use slotwise_ai::{
    CompactOptions, Compactor, FallbackError, FallbackOrchestrator, ModelReply, SystemPrompt,
};
use slotwise_conversation::{ConversationStore, Message, ToolInvocation, ToolResult};
use slotwise_core::{PassId, SessionId};
use slotwise_integration::DispatchEngine;
use slotwise_session::{SessionManager, ValidSession};
use std::sync::Arc;

/// One user turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: String,
    /// IANA timezone name of the user.
    pub timezone: Option<String>,
    /// Whether the user pinned this message.
    pub pinned: bool,
}

/// Result of one orchestration pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub ai_message: String,
    pub tools: Vec<ToolInvocation>,
    pub tool_results: Vec<ToolResult>,
    pub requires_confirmation: bool,
    pub model_used: String,
    pub switched_model: bool,
}

/// Result of confirming or cancelling pending tools.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub ai_message: String,
    pub tool_results: Vec<ToolResult>,
}

/// Coordinates sessions, conversation history, generation and dispatch.
pub struct Coordinator {
    sessions: Arc<SessionManager>,
    conversations: ConversationStore,
    compactor: Arc<Compactor>,
    orchestrator: FallbackOrchestrator,
    dispatch: DispatchEngine,
    preserve_recent: usize,
    ai_compaction: bool,
}

impl Coordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        compactor: Arc<Compactor>,
        orchestrator: FallbackOrchestrator,
        dispatch: DispatchEngine,
    ) -> Self {
        Self {
            sessions,
            conversations: ConversationStore::new(),
            compactor,
            orchestrator,
            dispatch,
            preserve_recent: 12,
            ai_compaction: true,
        }
    }

    /// Sets how history is compacted before a pass.
    #[must_use]
    pub fn with_compaction(mut self, preserve_recent: usize, ai_compaction: bool) -> Self {
        self.preserve_recent = preserve_recent;
        self.ai_compaction = ai_compaction;
        self
    }

    /// Returns the session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Returns the conversation store.
    #[must_use]
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Runs one orchestration pass for a user message.
    ///
    /// # Errors
    ///
    /// Returns `AllModelsExhausted` if no model produced a reply. The
    /// history is left unchanged in that case.
    #[tracing::instrument(skip_all, fields(pass_id = %PassId::new(), session_id = %session.id))]
    pub async fn orchestrate(
        &self,
        session: &ValidSession,
        turn: ChatTurn,
    ) -> Result<ChatOutcome, FallbackError> {
        let _turn = self.conversations.begin_turn(&session.id).await;
        let system = self
            .system_prompt(&session.id, turn.timezone.as_deref())
            .await;
        let preferred = self.orchestrator.default_model().unwrap_or_default();

        let mut history = self.conversations.snapshot(&session.id).await;
        if self.compactor.needs_compaction(&history) {
            let mut options = CompactOptions::default().with_preserve_recent(self.preserve_recent);
            if self.ai_compaction {
                options = options.with_ai(preferred.clone());
            }
            let before = history.len();
            history = self.compactor.compact(&history, &options).await;
            tracing::info!(before, after = history.len(), "Compacted history");
            self.conversations
                .replace(&session.id, history.clone())
                .await;
        }

        let outcome = self
            .orchestrator
            .generate(&preferred, &history, &turn.message, Some(&system))
            .await?;
        if let Some(compacted) = outcome.compacted_history {
            self.conversations.replace(&session.id, compacted).await;
        }

        let reply = ModelReply::parse(&outcome.text);
        if reply.dropped_tools > 0 {
            tracing::warn!(dropped = reply.dropped_tools, "Model reply had malformed tools");
        }
        let tool_results = self
            .dispatch
            .dispatch_all(reply.tools.clone(), session)
            .await;
        let requires_confirmation = tool_results.iter().any(|r| r.requires_confirmation);

        let ai_message = if reply.message.is_empty() {
            summarize(&tool_results)
        } else {
            reply.message
        };

        let mut user_message = Message::user(turn.message);
        if turn.pinned {
            user_message = user_message.pinned();
        }
        self.conversations
            .append(
                &session.id,
                [user_message, Message::assistant(ai_message.clone())],
            )
            .await;

        tracing::info!(
            model = %outcome.model_used,
            switched = outcome.switched,
            attempts = outcome.attempts,
            tools = reply.tools.len(),
            requires_confirmation,
            "Pass complete"
        );

        Ok(ChatOutcome {
            ai_message,
            tools: reply.tools,
            tool_results,
            requires_confirmation,
            model_used: outcome.model_used,
            switched_model: outcome.switched,
        })
    }

    /// Confirms or cancels pending tool invocations.
    #[tracing::instrument(skip_all, fields(pass_id = %PassId::new(), session_id = %session.id, confirmed = confirmed))]
    pub async fn confirm(
        &self,
        session: &ValidSession,
        tools: Vec<ToolInvocation>,
        confirmed: bool,
    ) -> ConfirmOutcome {
        let _turn = self.conversations.begin_turn(&session.id).await;
        let mut tool_results = Vec::with_capacity(tools.len());
        for invocation in &tools {
            let result = if confirmed {
                self.dispatch.confirm(invocation, session).await
            } else {
                self.dispatch.cancel(invocation, &session.id)
            };
            tool_results.push(result);
        }

        let ai_message = if confirmed {
            summarize(&tool_results)
        } else {
            "Okay, I won't make those changes.".to_string()
        };
        self.conversations
            .append(&session.id, [Message::assistant(ai_message.clone())])
            .await;

        ConfirmOutcome {
            ai_message,
            tool_results,
        }
    }

    /// Ends a session and drops everything held for it.
    pub async fn logout(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.logout(session_id).await;
        self.forget(session_id).await;
        removed
    }

    /// Deletes expired sessions and drops everything held for them, along
    /// with sessions deleted after a failed refresh. Returns how many were
    /// dropped.
    pub async fn sweep(&self) -> usize {
        let mut removed = self.sessions.sweep().await;
        removed.extend(self.sessions.take_evicted().await);
        for id in &removed {
            self.forget(id).await;
        }
        removed.len()
    }

    async fn forget(&self, session_id: &SessionId) {
        self.conversations.clear(session_id).await;
        self.dispatch.forget_session(session_id);
    }

    /// Returns the invocations awaiting confirmation for a session.
    #[must_use]
    pub fn pending(&self, session_id: &SessionId) -> Vec<ToolInvocation> {
        self.dispatch.pending(session_id)
    }

    /// Builds the system prompt from the session's cached instructions and a
    /// fresh time context.
    async fn system_prompt(&self, session_id: &SessionId, timezone: Option<&str>) -> String {
        let mut prompt = SystemPrompt::new(self.dispatch.catalog());
        if let Some(timezone) = timezone {
            prompt = prompt.with_timezone(timezone);
        }

        let instructions = match self.sessions.cached_prompt(session_id).await {
            Some(cached) => cached,
            None => {
                let instructions = prompt.instructions();
                if let Err(e) = self
                    .sessions
                    .cache_prompt(session_id, instructions.clone())
                    .await
                {
                    tracing::debug!(error = %e, "Could not cache system prompt");
                }
                instructions
            }
        };

        format!("{}\n\n{}", prompt.context(), instructions)
    }
}

/// Describes tool outcomes when the model gave no message of its own.
fn summarize(results: &[ToolResult]) -> String {
    match results {
        [] => "Done.".to_string(),
        [only] => only.message.clone(),
        many => many
            .iter()
            .map(|r| format!("- {}", r.message))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, TestHarness};

    fn turn(message: &str) -> ChatTurn {
        ChatTurn {
            message: message.to_string(),
            timezone: Some("Europe/Berlin".to_string()),
            pinned: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plain_reply_is_recorded_in_history() {
        let harness = TestHarness::new(ScriptedModel::replying(["Hello! How can I help?"])).await;
        let session = harness.session().await;

        let outcome = harness
            .coordinator
            .orchestrate(&session, turn("hi"))
            .await
            .expect("reply");

        assert_eq!(outcome.ai_message, "Hello! How can I help?");
        assert!(outcome.tools.is_empty());
        assert!(!outcome.switched_model);
        assert_eq!(outcome.model_used, "primary");

        let history = harness.coordinator.conversations().snapshot(&session.id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn system_prompt_carries_cached_instructions_and_timezone() {
        let model = ScriptedModel::replying(["one", "two"]);
        let harness = TestHarness::new(model.clone()).await;
        let session = harness.session().await;

        harness
            .coordinator
            .orchestrate(&session, turn("first"))
            .await
            .expect("reply");
        assert!(harness.sessions.cached_prompt(&session.id).await.is_some());

        harness
            .coordinator
            .orchestrate(&session, turn("second"))
            .await
            .expect("reply");

        let systems = model.systems();
        assert_eq!(systems.len(), 2);
        assert!(systems[1].contains("Europe/Berlin"));
        assert!(systems[1].contains("delete_event"));
    }

    #[tokio::test(start_paused = true)]
    async fn tools_are_dispatched_and_gated() {
        let harness = TestHarness::new(ScriptedModel::replying([
            r#"{"message":"Here is your week, and I'll remove the dentist once you confirm.","tools":[{"name":"list_events","parameters":{}},{"name":"delete_event","parameters":{"event_id":"e1"}}]}"#,
        ]))
        .await;
        let session = harness.session().await;

        let outcome = harness
            .coordinator
            .orchestrate(&session, turn("clear my dentist appointment"))
            .await
            .expect("reply");

        assert_eq!(outcome.tools.len(), 2);
        assert!(outcome.tool_results[0].success);
        assert!(outcome.tool_results[1].requires_confirmation);
        assert!(outcome.requires_confirmation);
        assert_eq!(harness.calendar.calls(), vec!["list"]);

        let confirmed = harness
            .coordinator
            .confirm(&session, vec![outcome.tools[1].clone()], true)
            .await;
        assert!(confirmed.tool_results[0].success);
        assert_eq!(harness.calendar.calls(), vec!["list", "delete:e1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_makes_no_calendar_calls() {
        let harness = TestHarness::new(ScriptedModel::replying([
            r#"{"message":"Confirm?","tools":[{"name":"delete_event","parameters":{"event_id":"e1"}}]}"#,
        ]))
        .await;
        let session = harness.session().await;

        let outcome = harness
            .coordinator
            .orchestrate(&session, turn("delete it"))
            .await
            .expect("reply");
        let cancelled = harness
            .coordinator
            .confirm(&session, outcome.tools, false)
            .await;

        assert!(cancelled.tool_results[0].success);
        assert!(cancelled.ai_message.contains("won't"));
        assert!(harness.calendar.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_models_leave_history_untouched() {
        let harness = TestHarness::new(ScriptedModel::failing()).await;
        let session = harness.session().await;

        let result = harness.coordinator.orchestrate(&session, turn("hi")).await;

        assert!(matches!(
            result,
            Err(FallbackError::AllModelsExhausted { .. })
        ));
        assert_eq!(harness.coordinator.conversations().len(&session.id).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_drops_history_and_session() {
        let harness = TestHarness::new(ScriptedModel::replying(["ok"])).await;
        let session = harness.session().await;
        harness
            .coordinator
            .orchestrate(&session, turn("hi"))
            .await
            .expect("reply");

        assert!(harness.coordinator.logout(&session.id).await);
        assert_eq!(harness.coordinator.conversations().len(&session.id).await, 0);
        assert!(harness.sessions.validate(&session.id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_history_and_pending_tools_of_expired_sessions() {
        let harness = TestHarness::new(ScriptedModel::replying([
            r#"{"message":"Confirm?","tools":[{"name":"delete_event","parameters":{"event_id":"e1"}}]}"#,
        ]))
        .await;
        let session = harness.expired_session().await;
        harness
            .coordinator
            .orchestrate(&session, turn("delete it"))
            .await
            .expect("reply");
        assert_eq!(harness.coordinator.pending(&session.id).len(), 1);

        assert_eq!(harness.coordinator.sweep().await, 1);

        assert_eq!(harness.coordinator.conversations().session_count().await, 0);
        assert!(harness.coordinator.pending(&session.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_state_of_sessions_evicted_by_failed_refresh() {
        let harness = TestHarness::new(ScriptedModel::replying(["ok"])).await;
        let session = harness.session().await;
        harness
            .coordinator
            .orchestrate(&session, turn("hi"))
            .await
            .expect("reply");

        // The fake token endpoint rejects every refresh.
        assert!(harness.sessions.refresh(&session.id).await.is_err());
        assert_eq!(harness.coordinator.sweep().await, 1);
        assert_eq!(harness.coordinator.conversations().len(&session.id).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_passes_for_one_session_keep_every_message() {
        let model = ScriptedModel::replying(["first reply", "second reply"])
            .with_delay(std::time::Duration::from_secs(5));
        let harness = TestHarness::new(model.clone()).await;
        let session = harness.session().await;

        let (first, second) = tokio::join!(
            harness.coordinator.orchestrate(&session, turn("first")),
            harness.coordinator.orchestrate(&session, turn("second")),
        );
        first.expect("first reply");
        second.expect("second reply");

        // The second pass saw the first pass's exchange.
        assert_eq!(model.request_sizes(), vec![1, 3]);
        let history = harness.coordinator.conversations().snapshot(&session.id).await;
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["first", "first reply", "second", "second reply"]
        );
    }

    #[test]
    fn summary_of_several_results_lists_each() {
        let text = summarize(&[
            ToolResult::success("Created \"Gym\"", None),
            ToolResult::failure("The calendar rejected the request"),
        ]);
        assert_eq!(
            text,
            "- Created \"Gym\"\n- The calendar rejected the request"
        );
    }
}
