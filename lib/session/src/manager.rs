//! Session lifecycle management.
//!
//! The [`SessionManager`] owns every live session. Each session sits behind
//! its own async mutex so concurrent requests for the same user serialize
//! around validate, refresh and persist, while the outer map lock is only
//! held for lookups, inserts and removals.
//!
//! A session whose access token has expired is never handed out: validation
//! refreshes it first and deletes it when the refresh fails.

use crate::error::{RefreshError, SessionError};
use crate::oauth::TokenEndpoint;
use crate::persist::{SessionPersistence, StoredSession};
use crate::session::{Credentials, Session};
use chrono::{DateTime, Utc};
use slotwise_core::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Tokens expiring within this window are refreshed on validation.
    pub refresh_horizon: chrono::Duration,
    /// Hard timeout on one token endpoint call.
    pub refresh_timeout: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            refresh_horizon: chrono::Duration::minutes(5),
            refresh_timeout: Duration::from_secs(15),
        }
    }
}

/// A validated session, handed out by value for one call.
#[derive(Debug, Clone)]
pub struct ValidSession {
    pub id: SessionId,
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
}

struct SessionSlot {
    // Set once the session has been deleted, so waiters on the slot mutex
    // do not resurrect it.
    removed: AtomicBool,
    session: Mutex<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            removed: AtomicBool::new(false),
            session: Mutex::new(session),
        })
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Owns live sessions, their refresh and their durable copy.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    store: Arc<dyn SessionPersistence>,
    tokens: Arc<dyn TokenEndpoint>,
    config: SessionManagerConfig,
    /// Sessions deleted after a failed refresh, not yet reported.
    evicted: Mutex<Vec<SessionId>>,
}

impl SessionManager {
    /// Creates an empty manager. Call [`load`](Self::load) to restore
    /// persisted sessions.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionPersistence>,
        tokens: Arc<dyn TokenEndpoint>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            tokens,
            config,
            evicted: Mutex::new(Vec::new()),
        }
    }

    /// Restores sessions from durable storage.
    ///
    /// Expired entries are discarded without a refresh attempt. Storage
    /// failures are logged and startup continues with an empty map.
    pub async fn load(&self) -> usize {
        let report = match self.store.load(Utc::now()).await {
            Ok(report) => report,
            Err(report) => {
                tracing::warn!(error = %report, "Failed to load session store, starting empty");
                return 0;
            }
        };

        let mut sessions = self.sessions.write().await;
        for (id, record) in report.sessions {
            let session = Session::restore(id.clone(), record.credentials, record.created_at);
            sessions.insert(id, SessionSlot::new(session));
        }

        tracing::info!(
            loaded = sessions.len(),
            expired = report.expired,
            corrupt = report.corrupt,
            "Restored sessions from store"
        );
        sessions.len()
    }

    /// Stores a new session and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::StorageFailed` if the session cannot be persisted.
    pub async fn create(&self, credentials: Credentials) -> Result<SessionId, SessionError> {
        let id = SessionId::generate();
        let session = Session::new(id.clone(), credentials);

        self.store
            .upsert(&id, record_of(&session))
            .await
            .map_err(|report| SessionError::StorageFailed {
                reason: report.to_string(),
            })?;

        self.sessions
            .write()
            .await
            .insert(id.clone(), SessionSlot::new(session));

        tracing::info!(session_id = %id, "Created session");
        Ok(id)
    }

    /// Exchanges an OAuth authorization code and creates a session from the
    /// resulting grant.
    ///
    /// # Errors
    ///
    /// Returns `CodeExchangeFailed` if the provider rejects the code, or
    /// `StorageFailed` if the new session cannot be persisted.
    #[tracing::instrument(skip_all)]
    pub async fn create_from_code(&self, code: &str) -> Result<SessionId, SessionError> {
        let grant = tokio::time::timeout(self.config.refresh_timeout, self.tokens.exchange_code(code))
            .await
            .map_err(|_| SessionError::CodeExchangeFailed {
                reason: "token endpoint timed out".to_string(),
            })?
            .map_err(|e| SessionError::CodeExchangeFailed {
                reason: e.to_string(),
            })?;

        self.create(grant.into_credentials()).await
    }

    /// Validates a session and returns its current credentials.
    ///
    /// Credentials expiring within the refresh horizon are refreshed first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `Expired` when a needed refresh
    /// fails (the session is deleted in that case).
    pub async fn validate(&self, id: &SessionId) -> Result<ValidSession, SessionError> {
        let slot = self.slot(id).await?;
        let mut session = slot.session.lock().await;
        if slot.is_removed() {
            return Err(SessionError::NotFound { id: id.clone() });
        }

        let now = Utc::now();
        if session
            .credentials()
            .expires_within(self.config.refresh_horizon, now)
        {
            tracing::debug!(session_id = %id, "Credentials near expiry, refreshing");
            self.refresh_locked(&slot, &mut session)
                .await
                .map_err(|_| SessionError::Expired { id: id.clone() })?;
        }

        Ok(ValidSession {
            id: id.clone(),
            credentials: session.credentials().clone(),
            created_at: session.created_at(),
        })
    }

    /// Forces a token refresh for a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `RefreshFailed` when the provider
    /// rejects the refresh (the session is deleted in that case).
    pub async fn refresh(&self, id: &SessionId) -> Result<Credentials, SessionError> {
        let slot = self.slot(id).await?;
        let mut session = slot.session.lock().await;
        if slot.is_removed() {
            return Err(SessionError::NotFound { id: id.clone() });
        }
        self.refresh_locked(&slot, &mut session).await?;
        Ok(session.credentials().clone())
    }

    /// Deletes every expired session that has no refresh in flight.
    ///
    /// Returns the ids of the sessions deleted.
    pub async fn sweep(&self) -> Vec<SessionId> {
        let now = Utc::now();
        let slots: Vec<(SessionId, Arc<SessionSlot>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut expired = Vec::new();
        for (id, slot) in slots {
            // A held slot lock means a validate or refresh is in progress.
            let Ok(session) = slot.session.try_lock() else {
                continue;
            };
            if !slot.is_removed() && session.credentials().is_expired_at(now) {
                slot.mark_removed();
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return expired;
        }

        {
            let mut sessions = self.sessions.write().await;
            for id in &expired {
                sessions.remove(id);
            }
        }
        if let Err(report) = self.store.remove(&expired).await {
            tracing::warn!(error = %report, "Failed to persist session sweep");
        }

        tracing::info!(count = expired.len(), "Swept expired sessions");
        expired
    }

    /// Returns and forgets the ids of sessions deleted because their refresh
    /// failed since the last call.
    pub async fn take_evicted(&self) -> Vec<SessionId> {
        std::mem::take(&mut *self.evicted.lock().await)
    }

    /// Deletes a session regardless of expiry. Returns whether it existed.
    pub async fn logout(&self, id: &SessionId) -> bool {
        let Some(slot) = self.sessions.write().await.remove(id) else {
            return false;
        };
        slot.mark_removed();

        if let Err(report) = self.store.remove(std::slice::from_ref(id)).await {
            tracing::warn!(session_id = %id, error = %report, "Failed to persist logout");
        }
        tracing::info!(session_id = %id, "Session logged out");
        true
    }

    /// Stores the per-session system prompt.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn cache_prompt(&self, id: &SessionId, prompt: String) -> Result<(), SessionError> {
        let slot = self.slot(id).await?;
        slot.session.lock().await.set_cached_prompt(Some(prompt));
        Ok(())
    }

    /// Returns the cached system prompt for a session, if any.
    pub async fn cached_prompt(&self, id: &SessionId) -> Option<String> {
        let slot = self.slot(id).await.ok()?;
        let session = slot.session.lock().await;
        session.cached_prompt().map(str::to_string)
    }

    /// Returns when a session was created.
    pub async fn created_at(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        let slot = self.slot(id).await.ok()?;
        let session = slot.session.lock().await;
        Some(session.created_at())
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns true if no sessions are held.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: id.clone() })
    }

    async fn refresh_locked(
        &self,
        slot: &SessionSlot,
        session: &mut Session,
    ) -> Result<(), SessionError> {
        let id = session.id().clone();
        let outcome = match session.credentials().refresh_token.clone() {
            Some(refresh_token) => tokio::time::timeout(
                self.config.refresh_timeout,
                self.tokens.refresh(&refresh_token),
            )
            .await
            .unwrap_or(Err(RefreshError::TimedOut)),
            None => Err(RefreshError::MissingRefreshToken),
        };

        match outcome {
            Ok(grant) => {
                let refreshed = grant.into_credentials();
                session.apply_refresh(
                    refreshed.access_token,
                    refreshed.refresh_token,
                    refreshed.expiry_instant,
                );
                if let Err(report) = self.store.upsert(&id, record_of(session)).await {
                    tracing::warn!(session_id = %id, error = %report, "Failed to persist refreshed session");
                }
                tracing::info!(session_id = %id, "Refreshed session credentials");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(session_id = %id, error = %source, "Token refresh failed, deleting session");
                slot.mark_removed();
                self.sessions.write().await.remove(&id);
                if let Err(report) = self.store.remove(std::slice::from_ref(&id)).await {
                    tracing::warn!(session_id = %id, error = %report, "Failed to persist session deletion");
                }
                self.evicted.lock().await.push(id.clone());
                Err(SessionError::RefreshFailed { id, source })
            }
        }
    }
}

fn record_of(session: &Session) -> StoredSession {
    StoredSession {
        credentials: session.credentials().clone(),
        created_at: session.created_at(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::TokenGrant;
    use crate::persist::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Token endpoint that either always succeeds or always rejects.
    struct FakeTokens {
        succeed: bool,
        rotate: bool,
        calls: AtomicUsize,
    }

    impl FakeTokens {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                rotate: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

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
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent validators a chance to queue on the slot.
            tokio::task::yield_now().await;
            if self.succeed {
                Ok(TokenGrant {
                    access_token: "fresh".to_string(),
                    refresh_token: self.rotate.then(|| "rotated".to_string()),
                    expires_in_seconds: Some(3600),
                })
            } else {
                Err(RefreshError::Rejected {
                    reason: "invalid_grant".to_string(),
                })
            }
        }
    }

    fn manager(tokens: Arc<FakeTokens>) -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            store.clone(),
            tokens,
            SessionManagerConfig::default(),
        );
        (manager, store)
    }

    fn credentials(expires_in: chrono::Duration) -> Credentials {
        Credentials::new("access", Some("refresh".to_string()), Utc::now() + expires_in)
    }

    #[tokio::test]
    async fn create_then_validate() {
        let tokens = FakeTokens::new(true);
        let (manager, store) = manager(tokens.clone());
        let id = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");

        let valid = manager.validate(&id).await.expect("valid");
        assert_eq!(valid.credentials.access_token, "access");
        assert_eq!(tokens.calls(), 0);
        assert_eq!(store.ids().await, vec![id]);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (manager, _) = manager(FakeTokens::new(true));
        let err = manager.validate(&SessionId::new("nope")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn near_expiry_session_is_refreshed() {
        let tokens = FakeTokens::new(true);
        let (manager, _) = manager(tokens.clone());
        let id = manager
            .create(credentials(chrono::Duration::minutes(2)))
            .await
            .expect("create");

        let valid = manager.validate(&id).await.expect("valid");
        assert_eq!(valid.credentials.access_token, "fresh");
        assert_eq!(valid.credentials.refresh_token.as_deref(), Some("refresh"));
        assert!(valid.credentials.expiry_instant > Utc::now() + chrono::Duration::minutes(50));
        assert_eq!(tokens.calls(), 1);
    }

    #[tokio::test]
    async fn expired_session_with_failing_refresh_is_removed() {
        let (manager, store) = manager(FakeTokens::new(false));
        let id = manager
            .create(credentials(chrono::Duration::minutes(-1)))
            .await
            .expect("create");

        let err = manager.validate(&id).await.unwrap_err();
        assert!(matches!(err, SessionError::Expired { .. }));
        assert_eq!(manager.len().await, 0);
        assert!(store.ids().await.is_empty());

        let again = manager.validate(&id).await.unwrap_err();
        assert!(matches!(again, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_session() {
        let (manager, _) = manager(FakeTokens::new(true));
        let id = manager
            .create(Credentials::new(
                "access",
                None,
                Utc::now() - chrono::Duration::minutes(1),
            ))
            .await
            .expect("create");

        assert!(manager.validate(&id).await.is_err());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn explicit_refresh_failure_reports_refresh_failed() {
        let (manager, _) = manager(FakeTokens::new(false));
        let id = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");

        let err = manager.refresh(&id).await.unwrap_err();
        assert!(matches!(err, SessionError::RefreshFailed { .. }));
        assert!(manager.is_empty().await);
        assert_eq!(manager.take_evicted().await, vec![id]);
        assert!(manager.take_evicted().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_typed() {
        let tokens = FakeTokens::new(true);
        let (manager, _) = manager(tokens.clone());
        let id = manager
            .create(Credentials::new(
                "access",
                None,
                Utc::now() + chrono::Duration::hours(1),
            ))
            .await
            .expect("create");

        let err = manager.refresh(&id).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::RefreshFailed {
                id: id.clone(),
                source: RefreshError::MissingRefreshToken,
            }
        );
        assert_eq!(tokens.calls(), 0);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_stored() {
        let tokens = Arc::new(FakeTokens {
            succeed: true,
            rotate: true,
            calls: AtomicUsize::new(0),
        });
        let (manager, _) = manager(tokens);
        let id = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");

        let creds = manager.refresh(&id).await.expect("refresh");
        assert_eq!(creds.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn concurrent_validation_refreshes_once() {
        let tokens = FakeTokens::new(true);
        let (manager, _) = manager(tokens.clone());
        let manager = Arc::new(manager);
        let id = manager
            .create(credentials(chrono::Duration::minutes(1)))
            .await
            .expect("create");

        let a = tokio::spawn({
            let manager = Arc::clone(&manager);
            let id = id.clone();
            async move { manager.validate(&id).await }
        });
        let b = tokio::spawn({
            let manager = Arc::clone(&manager);
            let id = id.clone();
            async move { manager.validate(&id).await }
        });

        assert!(a.await.expect("join").is_ok());
        assert!(b.await.expect("join").is_ok());
        assert_eq!(tokens.calls(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let (manager, store) = manager(FakeTokens::new(true));
        let live = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");
        manager
            .create(credentials(chrono::Duration::minutes(-5)))
            .await
            .expect("create");
        manager
            .create(credentials(chrono::Duration::seconds(-1)))
            .await
            .expect("create");

        assert_eq!(manager.sweep().await.len(), 2);
        assert_eq!(manager.len().await, 1);
        assert_eq!(store.ids().await, vec![live]);
        assert!(manager.sweep().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_skips_session_with_refresh_in_flight() {
        let (manager, _) = manager(FakeTokens::new(true));
        let id = manager
            .create(credentials(chrono::Duration::minutes(-5)))
            .await
            .expect("create");

        let slot = manager.slot(&id).await.expect("slot");
        let guard = slot.session.lock().await;
        assert!(manager.sweep().await.is_empty());
        drop(guard);
        assert_eq!(manager.sweep().await, vec![id]);
    }

    #[tokio::test]
    async fn logout_removes_regardless_of_expiry() {
        let (manager, store) = manager(FakeTokens::new(true));
        let id = manager
            .create(credentials(chrono::Duration::hours(8)))
            .await
            .expect("create");

        assert!(manager.logout(&id).await);
        assert!(!manager.logout(&id).await);
        assert!(store.ids().await.is_empty());
    }

    #[tokio::test]
    async fn load_restores_live_sessions_without_refreshing() {
        let tokens = FakeTokens::new(true);
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                &SessionId::new("live"),
                StoredSession {
                    credentials: credentials(chrono::Duration::hours(1)),
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("upsert");
        store
            .upsert(
                &SessionId::new("stale"),
                StoredSession {
                    credentials: credentials(chrono::Duration::hours(-1)),
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("upsert");

        let manager = SessionManager::new(store, tokens.clone(), SessionManagerConfig::default());
        assert_eq!(manager.load().await, 1);
        assert!(manager.validate(&SessionId::new("live")).await.is_ok());
        assert!(manager.validate(&SessionId::new("stale")).await.is_err());
        assert_eq!(tokens.calls(), 0);
    }

    #[tokio::test]
    async fn code_exchange_creates_session() {
        let (manager, _) = manager(FakeTokens::new(true));
        let id = manager.create_from_code("abc").await.expect("create");
        let valid = manager.validate(&id).await.expect("valid");
        assert_eq!(valid.credentials.access_token, "access-abc");

        let err = manager.create_from_code("bad").await.unwrap_err();
        assert!(matches!(err, SessionError::CodeExchangeFailed { .. }));
    }

    #[tokio::test]
    async fn prompt_cache_is_per_session() {
        let (manager, _) = manager(FakeTokens::new(true));
        let a = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");
        let b = manager
            .create(credentials(chrono::Duration::hours(1)))
            .await
            .expect("create");

        manager
            .cache_prompt(&a, "prompt for a".to_string())
            .await
            .expect("cache");
        assert_eq!(manager.cached_prompt(&a).await.as_deref(), Some("prompt for a"));
        assert_eq!(manager.cached_prompt(&b).await, None);
        assert!(manager.created_at(&a).await.is_some());
    }
}
