//! Durable session storage.
//!
//! Sessions are persisted as one JSON document keyed by session id. Each value
//! holds the credential bundle and creation timestamp. Loading never fails
//! because of a single bad entry: corrupt and already-expired entries are
//! skipped and reported in [`LoadReport`].

use crate::error::StoreError;
use crate::session::Credentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use slotwise_core::{Result, SessionId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// The credential bundle.
    pub credentials: Credentials,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// Outcome of loading the durable store at startup.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Entries that are still usable.
    pub sessions: Vec<(SessionId, StoredSession)>,
    /// Entries dropped because their expiry had already passed.
    pub expired: usize,
    /// Entries dropped because they could not be decoded.
    pub corrupt: usize,
}

/// Trait for durable session storage.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Loads every stored session, discarding entries expired as of `now`.
    async fn load(&self, now: DateTime<Utc>) -> Result<LoadReport, StoreError>;

    /// Inserts or replaces a session record.
    async fn upsert(&self, id: &SessionId, record: StoredSession) -> Result<(), StoreError>;

    /// Removes session records. Unknown ids are ignored.
    async fn remove(&self, ids: &[SessionId]) -> Result<(), StoreError>;
}

/// Session storage backed by a single JSON file.
///
/// The whole document is rewritten on each change through a temporary file
/// and an atomic rename, so a crash mid-write leaves the previous version.
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<BTreeMap<String, StoredSession>>,
}

impl JsonFileStore {
    /// Creates a store writing to `path`. Nothing is read until [`load`].
    ///
    /// [`load`]: SessionPersistence::load
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_document(
        &self,
        document: &BTreeMap<String, StoredSession>,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(document).map_err(|e| StoreError::EncodeFailed {
            reason: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| self.write_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> StoreError {
        StoreError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl SessionPersistence for JsonFileStore {
    async fn load(&self, now: DateTime<Utc>) -> Result<LoadReport, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadReport::default());
            }
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let mut report = LoadReport::default();
        let entries: BTreeMap<String, JsonValue> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Session store is not a JSON object, starting empty"
                );
                return Ok(report);
            }
        };

        let mut kept = BTreeMap::new();
        for (id, value) in entries {
            match serde_json::from_value::<StoredSession>(value) {
                Ok(record) if record.credentials.is_expired_at(now) => report.expired += 1,
                Ok(record) => {
                    report.sessions.push((SessionId::new(id.clone()), record.clone()));
                    kept.insert(id, record);
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping corrupt session entry");
                    report.corrupt += 1;
                }
            }
        }

        let mut document = self.document.lock().await;
        *document = kept;
        if report.expired > 0 || report.corrupt > 0 {
            self.write_document(&document).await?;
        }

        Ok(report)
    }

    async fn upsert(&self, id: &SessionId, record: StoredSession) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        document.insert(id.as_str().to_string(), record);
        self.write_document(&document).await
    }

    async fn remove(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        let before = document.len();
        for id in ids {
            document.remove(id.as_str());
        }
        if document.len() == before {
            return Ok(());
        }
        self.write_document(&document).await
    }
}

/// Non-durable storage for deployments without a store path.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<SessionId, StoredSession>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ids currently held.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl SessionPersistence for MemoryStore {
    async fn load(&self, now: DateTime<Utc>) -> Result<LoadReport, StoreError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, record| !record.credentials.is_expired_at(now));
        Ok(LoadReport {
            sessions: entries
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
            expired: before - entries.len(),
            corrupt: 0,
        })
    }

    async fn upsert(&self, id: &SessionId, record: StoredSession) -> Result<(), StoreError> {
        self.entries.lock().await.insert(id.clone(), record);
        Ok(())
    }

    async fn remove(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}
