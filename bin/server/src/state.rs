//! Shared application state.

use crate::coordinator::Coordinator;
use slotwise_session::SessionManager;
use std::sync::Arc;

/// Session cookie settings.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Whether to set the Secure flag.
    pub secure: bool,
    pub max_age_days: i64,
}

/// Shared application state.
pub struct AppState {
    /// Request coordinator.
    pub coordinator: Arc<Coordinator>,
    /// Session cookie settings.
    pub cookies: CookieSettings,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(coordinator: Arc<Coordinator>, cookies: CookieSettings) -> Self {
        Self {
            coordinator,
            cookies,
        }
    }

    /// Returns the session manager.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        self.coordinator.sessions()
    }
}
