//! Per-session conversation history.
//!
//! Histories are append-only except for wholesale replacement after
//! compaction. Each session's history is independent; the store is shared
//! across request handlers.
//!
//! A turn that snapshots a history and later replaces it holds the session's
//! turn lock from [`ConversationStore::begin_turn`] for the whole span, so no
//! append from another turn lands in between and gets overwritten.

use crate::message::Message;
use slotwise_core::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// In-memory store of conversation histories keyed by session.
#[derive(Debug, Default)]
pub struct ConversationStore {
    histories: RwLock<HashMap<SessionId, Vec<Message>>>,
    turns: std::sync::Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the session's turn lock. Turns for one session run one at a
    /// time while the guard is held; other sessions are unaffected.
    pub async fn begin_turn(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let turn = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(turns.entry(session_id.clone()).or_default())
        };
        turn.lock_owned().await
    }

    /// Returns a copy of a session's history. Unknown sessions have none.
    pub async fn snapshot(&self, session_id: &SessionId) -> Vec<Message> {
        self.histories
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends messages to a session's history.
    pub async fn append(&self, session_id: &SessionId, messages: impl IntoIterator<Item = Message>) {
        self.histories
            .write()
            .await
            .entry(session_id.clone())
            .or_default()
            .extend(messages);
    }

    /// Replaces a session's history with a compacted sequence.
    pub async fn replace(&self, session_id: &SessionId, messages: Vec<Message>) {
        self.histories
            .write()
            .await
            .insert(session_id.clone(), messages);
    }

    /// Drops a session's history and turn lock.
    pub async fn clear(&self, session_id: &SessionId) {
        self.histories.write().await.remove(session_id);
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Returns the number of sessions with a history or turn lock.
    pub async fn session_count(&self) -> usize {
        let histories = self.histories.read().await.len();
        let turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner).len();
        histories.max(turns)
    }

    /// Returns the number of messages held for a session.
    pub async fn len(&self, session_id: &SessionId) -> usize {
        self.histories
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }
}
