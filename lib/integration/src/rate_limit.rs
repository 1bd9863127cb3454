//! Rate limiting for calendar calls.
//!
//! Enforces a minimum spacing between calls of the same category made on
//! behalf of the same session. Callers that arrive early are delayed, never
//! rejected.

use serde::{Deserialize, Serialize};
use slotwise_conversation::ToolCategory;
use slotwise_core::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between calls, per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Spacing between reads, in milliseconds.
    pub read_spacing_ms: u64,
    /// Spacing between writes, in milliseconds.
    pub write_spacing_ms: u64,
    /// Spacing between deletes, in milliseconds.
    pub delete_spacing_ms: u64,
}

impl RateLimitConfig {
    /// Uses the same spacing for every category.
    #[must_use]
    pub fn uniform(spacing: Duration) -> Self {
        let ms = spacing.as_millis() as u64;
        Self {
            read_spacing_ms: ms,
            write_spacing_ms: ms,
            delete_spacing_ms: ms,
        }
    }

    /// Returns the spacing for a category.
    #[must_use]
    pub fn spacing(&self, category: ToolCategory) -> Duration {
        Duration::from_millis(match category {
            ToolCategory::Read => self.read_spacing_ms,
            ToolCategory::Write => self.write_spacing_ms,
            ToolCategory::Delete => self.delete_spacing_ms,
        })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_spacing_ms: 200,
            write_spacing_ms: 1000,
            delete_spacing_ms: 1000,
        }
    }
}

type LedgerKey = (SessionId, ToolCategory);

/// Per-session, per-category record of the last granted call slot.
#[derive(Debug, Clone)]
pub struct RateLimitLedger {
    config: RateLimitConfig,
    /// Instant of the most recent reservation for each key.
    state: Arc<RwLock<HashMap<LedgerKey, Instant>>>,
}

impl RateLimitLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reserves the next call slot for the key and returns how long the
    /// caller must wait before using it.
    ///
    /// Each reservation is spaced from the previous one, so concurrent
    /// callers queue up rather than all firing when the spacing elapses.
    pub fn reserve(&self, session_id: &SessionId, category: ToolCategory) -> Duration {
        let spacing = self.config.spacing(category);
        let now = Instant::now();
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let slot = match state.get(&(session_id.clone(), category)) {
            Some(last) => (*last + spacing).max(now),
            None => now,
        };
        state.insert((session_id.clone(), category), slot);
        slot - now
    }

    /// Waits until the key may make its next call, and records it.
    pub async fn acquire(&self, session_id: &SessionId, category: ToolCategory) {
        let wait = self.reserve(session_id, category);
        if !wait.is_zero() {
            tracing::debug!(
                session_id = %session_id,
                category = %category,
                wait_ms = wait.as_millis() as u64,
                "Delaying calendar call"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns how long a call made now would wait, without reserving.
    #[must_use]
    pub fn check(&self, session_id: &SessionId, category: ToolCategory) -> Duration {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        state
            .get(&(session_id.clone(), category))
            .map(|last| (*last + self.config.spacing(category)).saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Drops every entry for a session.
    pub fn forget_session(&self, session_id: &SessionId) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.retain(|(id, _), _| id != session_id);
    }
}

impl Default for RateLimitLedger {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RateLimitLedger {
        RateLimitLedger::new(RateLimitConfig::uniform(Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let ledger = ledger();
        let id = SessionId::new("s1");
        assert_eq!(ledger.reserve(&id, ToolCategory::Read), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_calls_are_spaced() {
        let ledger = ledger();
        let id = SessionId::new("s1");
        let start = Instant::now();

        ledger.acquire(&id, ToolCategory::Write).await;
        ledger.acquire(&id, ToolCategory::Write).await;
        ledger.acquire(&id, ToolCategory::Write).await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn reservations_queue_behind_each_other() {
        let ledger = ledger();
        let id = SessionId::new("s1");
        assert_eq!(ledger.reserve(&id, ToolCategory::Read), Duration::ZERO);
        assert_eq!(ledger.reserve(&id, ToolCategory::Read), Duration::from_secs(1));
        assert_eq!(ledger.reserve(&id, ToolCategory::Read), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let ledger = ledger();
        let a = SessionId::new("a");
        let b = SessionId::new("b");
        ledger.reserve(&a, ToolCategory::Write);

        assert_eq!(ledger.reserve(&b, ToolCategory::Write), Duration::ZERO);
        assert_eq!(ledger.reserve(&a, ToolCategory::Read), Duration::ZERO);
        assert_eq!(ledger.check(&a, ToolCategory::Write), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_elapses() {
        let ledger = ledger();
        let id = SessionId::new("s1");
        ledger.reserve(&id, ToolCategory::Delete);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(ledger.reserve(&id, ToolCategory::Delete), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_session_clears_entries() {
        let ledger = ledger();
        let id = SessionId::new("s1");
        ledger.reserve(&id, ToolCategory::Read);
        ledger.forget_session(&id);
        assert_eq!(ledger.check(&id, ToolCategory::Read), Duration::ZERO);
    }
}
