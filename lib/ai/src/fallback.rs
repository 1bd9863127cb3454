//! Model fallback orchestration.
//!
//! One generation walks a candidate list: the requested model first, then the
//! remaining roster models in declared priority. Each candidate gets up to
//! `max_attempts` tries for transient failures, with exponential backoff after
//! every failed try. Saturation and rejection move straight to the next
//! candidate. Before a fallback candidate is tried, an oversized history is
//! compacted.

use crate::backend::{CompletionBackend, CompletionMessage, CompletionRequest};
use crate::compaction::{CompactOptions, Compactor};
use crate::error::{FailureKind, FallbackError, LlmError};
use crate::roster::ModelRoster;
use slotwise_conversation::Message;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Retry, timeout and compaction settings for fallback.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Attempts per candidate for transient failures.
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further one.
    pub base_backoff: Duration,
    /// Per-call timeout for the requested model.
    pub preferred_timeout: Duration,
    /// Per-call timeout for fallback models.
    pub fallback_timeout: Duration,
    /// Recent messages kept when compacting before a fallback.
    pub preserve_recent: usize,
    /// Whether compaction before a fallback may ask a model to summarize.
    pub ai_compaction: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            preferred_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(20),
            preserve_recent: 12,
            ai_compaction: true,
        }
    }
}

impl FallbackConfig {
    /// Returns the wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The generated text.
    pub text: String,
    /// The model that produced it.
    pub model_used: String,
    /// Whether the model differs from the requested one.
    pub switched: bool,
    /// Total completion calls made, across all candidates.
    pub attempts: u32,
    /// The compacted history, if compaction replaced it during this pass.
    pub compacted_history: Option<Vec<Message>>,
}

/// Drives generation across the model roster.
pub struct FallbackOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    roster: RwLock<ModelRoster>,
    compactor: Arc<Compactor>,
    config: FallbackConfig,
}

impl FallbackOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        roster: ModelRoster,
        compactor: Arc<Compactor>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            backend,
            roster: RwLock::new(roster),
            compactor,
            config,
        }
    }

    /// Returns a snapshot of the roster.
    #[must_use]
    pub fn roster(&self) -> ModelRoster {
        match self.roster.read() {
            Ok(roster) => roster.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the roster's preferred model.
    #[must_use]
    pub fn default_model(&self) -> Option<String> {
        self.roster().preferred().map(str::to_string)
    }

    /// Asks the backend which models it offers and updates the roster.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the roster is left unchanged.
    pub async fn discover(&self) -> Result<usize, LlmError> {
        let offered = self.backend.list_models().await?;
        let mut roster = match self.roster.write() {
            Ok(roster) => roster,
            Err(poisoned) => poisoned.into_inner(),
        };
        roster.apply_discovery(&offered);
        let available = roster
            .entries()
            .iter()
            .filter(|e| e.status.available)
            .count();
        tracing::info!(
            offered = offered.len(),
            available,
            total = roster.entries().len(),
            "Model discovery complete"
        );
        Ok(available)
    }

    /// Generates a reply to `new_message` given the conversation so far.
    ///
    /// # Errors
    ///
    /// Returns `AllModelsExhausted` when every candidate failed.
    #[tracing::instrument(skip_all, fields(preferred = %preferred_model))]
    pub async fn generate(
        &self,
        preferred_model: &str,
        history: &[Message],
        new_message: &str,
        system_prompt: Option<&str>,
    ) -> Result<GenerationOutcome, FallbackError> {
        let candidates = self.roster().candidates(preferred_model);
        let mut working: Option<Vec<Message>> = None;
        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error = None;
        let mut total_attempts = 0u32;
        let mut saturation_seen = false;

        for (index, candidate) in candidates.iter().enumerate() {
            attempted.push(candidate.clone());

            let current = working.as_deref().unwrap_or(history);
            if index > 0 && self.compactor.needs_compaction(current) {
                let mut options =
                    CompactOptions::default().with_preserve_recent(self.config.preserve_recent);
                // No summary calls once any model reported saturation in this pass.
                if self.config.ai_compaction && !saturation_seen {
                    options = options.with_ai(candidate.clone());
                }
                working = Some(self.compactor.compact(current, &options).await);
            }

            let mut request =
                CompletionRequest::from_history(working.as_deref().unwrap_or(history))
                    .with_message(CompletionMessage::user(new_message));
            if let Some(system) = system_prompt {
                request = request.with_system(system);
            }

            let timeout = if candidate == preferred_model {
                self.config.preferred_timeout
            } else {
                self.config.fallback_timeout
            };

            for attempt in 1..=self.config.max_attempts {
                total_attempts += 1;
                let result =
                    match tokio::time::timeout(timeout, self.backend.complete(candidate, &request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout),
                    };

                let error = match result {
                    Ok(response) => {
                        let switched = candidate != preferred_model;
                        if switched {
                            tracing::info!(model = %candidate, attempts = total_attempts, "Generated with fallback model");
                        }
                        return Ok(GenerationOutcome {
                            text: response.content,
                            model_used: candidate.clone(),
                            switched,
                            attempts: total_attempts,
                            compacted_history: working,
                        });
                    }
                    Err(error) => error,
                };

                let kind = error.kind();
                tracing::warn!(
                    model = %candidate,
                    attempt,
                    kind = ?kind,
                    error = %error,
                    "Completion attempt failed"
                );
                last_error = Some(error);

                match kind {
                    FailureKind::Transient => {
                        tokio::time::sleep(self.config.backoff_after(attempt)).await;
                    }
                    FailureKind::Saturation => {
                        saturation_seen = true;
                        break;
                    }
                    FailureKind::Rejected => break,
                }
            }
        }

        tracing::error!(attempted = ?attempted, "All models exhausted");
        Err(FallbackError::AllModelsExhausted {
            attempted,
            last_error,
        })
    }
}
