//! Conversation compaction.
//!
//! Keeps a conversation history within the context limits of the completion
//! models. Histories under the safety margin pass through untouched. Larger
//! histories are summarized by a model when allowed, and otherwise reduced
//! to a deterministic preserve-set: every pinned or important message plus
//! the most recent turns.
//!
//! Compaction never turns a non-empty history into an empty one and never
//! returns more messages than it was given.

use crate::backend::{CompletionBackend, CompletionMessage, CompletionRequest};
use crate::extract::extract_object_list;
use serde_json::Value as JsonValue;
use slotwise_conversation::{Message, MessageRole};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Characters per token used for approximate token counts.
const CHARS_PER_TOKEN: usize = 4;

/// Hard context limits and the fraction of them that triggers compaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextLimits {
    pub max_chars: usize,
    pub max_tokens: usize,
    pub safety_margin: f64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_chars: 120_000,
            max_tokens: 30_000,
            safety_margin: 0.9,
        }
    }
}

/// Size of a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySize {
    pub chars: usize,
    pub tokens: usize,
}

/// Per-call compaction options.
#[derive(Debug, Clone)]
pub struct CompactOptions {
    /// Number of most recent messages always kept by the deterministic path.
    pub preserve_recent: usize,
    /// Whether a model may summarize the history.
    pub use_ai: bool,
    /// Model used for summarization.
    pub model_for_summary: Option<String>,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            preserve_recent: 12,
            use_ai: false,
            model_for_summary: None,
        }
    }
}

impl CompactOptions {
    /// Enables model summarization with the given model.
    #[must_use]
    pub fn with_ai(mut self, model: impl Into<String>) -> Self {
        self.use_ai = true;
        self.model_for_summary = Some(model.into());
        self
    }

    /// Sets the number of recent messages to preserve.
    #[must_use]
    pub fn with_preserve_recent(mut self, preserve_recent: usize) -> Self {
        self.preserve_recent = preserve_recent;
        self
    }
}

/// Measures a history in characters and approximate tokens.
#[must_use]
pub fn measure(history: &[Message]) -> HistorySize {
    let chars = history.iter().map(|m| m.content.chars().count()).sum();
    HistorySize {
        chars,
        tokens: chars / CHARS_PER_TOKEN,
    }
}

/// Returns the deterministic preserve-set of a history.
///
/// Every pinned or important message plus the last `preserve_recent`
/// messages, in original order, de-duplicated by role and leading content
/// with the first occurrence kept. The newest message is always kept.
#[must_use]
pub fn preserve_set(history: &[Message], preserve_recent: usize) -> Vec<Message> {
    let recent_start = history.len().saturating_sub(preserve_recent.max(1));
    let mut seen = HashSet::new();
    history
        .iter()
        .enumerate()
        .filter(|(index, message)| *index >= recent_start || message.is_preserved())
        .filter(|(_, message)| seen.insert(message.dedup_key()))
        .map(|(_, message)| message.clone())
        .collect()
}

/// Compacts conversation histories.
pub struct Compactor {
    backend: Arc<dyn CompletionBackend>,
    limits: ContextLimits,
    summary_timeout: Duration,
}

impl Compactor {
    /// Creates a compactor summarizing through `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn CompletionBackend>, limits: ContextLimits) -> Self {
        Self {
            backend,
            limits,
            summary_timeout: Duration::from_secs(20),
        }
    }

    /// Sets the timeout for one summarization call.
    #[must_use]
    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = timeout;
        self
    }

    /// Returns true if the history reaches the safety margin on either limit.
    #[must_use]
    pub fn needs_compaction(&self, history: &[Message]) -> bool {
        let size = measure(history);
        let margin = self.limits.safety_margin;
        size.chars as f64 >= self.limits.max_chars as f64 * margin
            || size.tokens as f64 >= self.limits.max_tokens as f64 * margin
    }

    /// Compacts a history if it reaches the safety margin.
    pub async fn compact(&self, history: &[Message], options: &CompactOptions) -> Vec<Message> {
        if !self.needs_compaction(history) {
            return history.to_vec();
        }

        let before = measure(history);
        if options.use_ai {
            if let Some(model) = options.model_for_summary.as_deref() {
                if let Some(summary) = self.summarize(model, history).await {
                    tracing::info!(
                        model = %model,
                        before = history.len(),
                        after = summary.len(),
                        chars_before = before.chars,
                        "Compacted history with model summary"
                    );
                    return summary;
                }
            }
        }

        let kept = preserve_set(history, options.preserve_recent);
        tracing::info!(
            before = history.len(),
            after = kept.len(),
            chars_before = before.chars,
            "Compacted history to preserve-set"
        );
        kept
    }

    /// Asks a model to summarize the history. Returns `None` on any failure.
    async fn summarize(&self, model: &str, history: &[Message]) -> Option<Vec<Message>> {
        let transcript: Vec<JsonValue> = history
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                    "keep": m.is_preserved(),
                })
            })
            .collect();

        let request = CompletionRequest::default()
            .with_system(
                "You compress chat transcripts for a calendar assistant. Reply with only a JSON \
                 array of {\"role\": \"user\"|\"assistant\", \"content\": string} objects, \
                 shorter than the input. Copy entries marked keep verbatim. Keep every date, \
                 time, event title and decision.",
            )
            .with_message(CompletionMessage::user(
                serde_json::to_string(&transcript).ok()?,
            ))
            .with_temperature(0.0);

        let response = match tokio::time::timeout(
            self.summary_timeout,
            self.backend.complete(model, &request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(model = %model, error = %e, "Summary request failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(model = %model, "Summary request timed out");
                return None;
            }
        };

        let Some((strategy, items)) = extract_object_list(&response.content) else {
            tracing::warn!(model = %model, "Summary response held no JSON list");
            return None;
        };

        let summary: Vec<Message> = items
            .iter()
            .filter_map(|item| summary_message(item, history))
            .collect();

        if summary.is_empty() || summary.len() > history.len() {
            tracing::warn!(
                model = %model,
                strategy = strategy.name(),
                entries = summary.len(),
                input = history.len(),
                "Rejected model summary"
            );
            return None;
        }

        tracing::debug!(strategy = strategy.name(), "Parsed model summary");
        Some(summary)
    }
}

/// Converts one summary entry, carrying over flags of the message it copies.
fn summary_message(item: &JsonValue, history: &[Message]) -> Option<Message> {
    let role = MessageRole::parse(item.get("role")?.as_str()?)?;
    let content = item.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }

    let mut message = Message::new(role, content);
    let key = message.dedup_key();
    if let Some(original) = history.iter().find(|m| m.dedup_key() == key) {
        message.pinned = original.pinned;
        message.important = original.important;
    }
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompletionResponse;
    use crate::backend::TokenUsage;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend returning a fixed reply and recording requested models.
    struct ScriptedBackend {
        reply: Result<String, LlmError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(reply: Result<String, LlmError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            model: &str,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.lock().expect("lock").push(model.to_string());
            self.reply.clone().map(|content| CompletionResponse {
                content,
                model: model.to_string(),
                usage: TokenUsage::default(),
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(Vec::new())
        }
    }

    fn tight_limits() -> ContextLimits {
        ContextLimits {
            max_chars: 100,
            max_tokens: 1_000,
            safety_margin: 0.9,
        }
    }

    fn distinct_history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("user message number {i}"))
                } else {
                    Message::assistant(format!("assistant reply number {i}"))
                }
            })
            .collect()
    }

    fn compactor(backend: Arc<ScriptedBackend>) -> Compactor {
        Compactor::new(backend, tight_limits())
    }

    #[test]
    fn measure_counts_chars_and_tokens() {
        let size = measure(&[Message::user("abcd"), Message::assistant("efghijkl")]);
        assert_eq!(size.chars, 12);
        assert_eq!(size.tokens, 3);
    }

    #[tokio::test]
    async fn small_history_is_untouched() {
        let backend = ScriptedBackend::new(Ok("[]".to_string()));
        let compactor = compactor(backend.clone());
        let history = vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
            Message::assistant("d"),
            Message::user("e"),
        ];

        let out = compactor
            .compact(&history, &CompactOptions::default().with_ai("m"))
            .await;
        assert_eq!(out, history);
        // Compacting the output again changes nothing.
        let again = compactor.compact(&out, &CompactOptions::default()).await;
        assert_eq!(again, out);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn deterministic_path_keeps_last_twelve_in_order() {
        let compactor = compactor(ScriptedBackend::new(Ok("[]".to_string())));
        let history = distinct_history(20);

        let out = compactor.compact(&history, &CompactOptions::default()).await;
        assert_eq!(out, history[8..].to_vec());
    }

    #[tokio::test]
    async fn pinned_and_important_survive() {
        let compactor = compactor(ScriptedBackend::new(Ok("[]".to_string())));
        let mut history = distinct_history(20);
        history[1] = Message::assistant("Dentist booked for Tuesday 3pm").pinned();
        history[3] = Message::user("I never take meetings before 9").important();

        let out = compactor
            .compact(&history, &CompactOptions::default().with_preserve_recent(4))
            .await;
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], history[1]);
        assert_eq!(out[1], history[3]);
        assert_eq!(out[2..], history[16..]);
    }

    #[test]
    fn preserve_set_drops_duplicates_keeping_first() {
        let first = Message::user("same question").pinned();
        let history = vec![
            first.clone(),
            Message::assistant("answer"),
            Message::user("same question"),
        ];
        let out = preserve_set(&history, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, first.id);
        assert_eq!(out[1].content, "answer");
    }

    #[tokio::test]
    async fn ai_summary_is_used_when_valid() {
        let reply = r#"Summary: [{"role":"user","content":"Plan team offsite"},{"role":"assistant","content":"Offsite set for May 3"}]"#;
        let backend = ScriptedBackend::new(Ok(reply.to_string()));
        let compactor = compactor(backend.clone());
        let history = distinct_history(20);

        let out = compactor
            .compact(&history, &CompactOptions::default().with_ai("summarizer"))
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "Offsite set for May 3");
        assert_eq!(backend.calls.lock().expect("lock")[0], "summarizer");
    }

    #[tokio::test]
    async fn oversized_summary_falls_back() {
        let entries: Vec<_> = (0..25)
            .map(|i| serde_json::json!({"role": "user", "content": format!("m{i}")}))
            .collect();
        let backend = ScriptedBackend::new(Ok(serde_json::to_string(&entries).expect("encode")));
        let compactor = compactor(backend);
        let history = distinct_history(20);

        let out = compactor
            .compact(&history, &CompactOptions::default().with_ai("m"))
            .await;
        assert_eq!(out, history[8..].to_vec());
    }

    #[tokio::test]
    async fn unusable_summary_falls_back() {
        for reply in [
            Ok("I can't do that.".to_string()),
            Ok(r#"[{"role":"system","content":"x"},{"role":"user","content":"  "}]"#.to_string()),
            Err(LlmError::Timeout),
        ] {
            let compactor = compactor(ScriptedBackend::new(reply));
            let history = distinct_history(20);
            let out = compactor
                .compact(&history, &CompactOptions::default().with_ai("m"))
                .await;
            assert_eq!(out.len(), 12);
        }
    }

    #[tokio::test]
    async fn output_is_never_empty_or_longer() {
        let compactor = compactor(ScriptedBackend::new(Ok("[]".to_string())));
        for n in [1, 2, 5, 13, 40] {
            let history: Vec<Message> = (0..n)
                .map(|i| Message::user(format!("{i}:{}", "x".repeat(60))))
                .collect();
            for preserve in [0, 1, 12] {
                let out = compactor
                    .compact(
                        &history,
                        &CompactOptions::default().with_preserve_recent(preserve),
                    )
                    .await;
                assert!(out.len() <= history.len());
                assert!(!out.is_empty(), "n={n} preserve={preserve}");
            }
        }
    }
}
