//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`SESSION__STORE_PATH`, `AI__PREFERRED_MODEL`).
//! Everything except the OAuth client credentials has a default.

use serde::Deserialize;
use slotwise_ai::{ContextLimits, FallbackConfig};
use slotwise_integration::{GOOGLE_CALENDAR_URL, RateLimitConfig, RetryPolicy};
use slotwise_session::{GOOGLE_TOKEN_URL, SessionManagerConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// OAuth client for the calendar provider.
    pub oauth: OAuthConfig,

    /// Completion backend and fallback configuration.
    #[serde(default)]
    pub ai: AiConfig,

    /// Calendar transport configuration.
    #[serde(default)]
    pub calendar: CalendarConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// JSON file holding persisted sessions. Sessions are kept in memory
    /// only when unset.
    pub store_path: Option<PathBuf>,

    /// Interval between expired-session sweeps, in seconds.
    pub sweep_interval_seconds: u64,

    /// Tokens expiring within this many seconds are refreshed on validation.
    pub refresh_horizon_seconds: i64,

    /// Timeout on one token endpoint call, in seconds.
    pub refresh_timeout_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    pub secure_cookies: bool,

    /// Lifetime of the session cookie, in days.
    pub cookie_max_age_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            sweep_interval_seconds: 300,
            refresh_horizon_seconds: 300,
            refresh_timeout_seconds: 15,
            secure_cookies: true,
            cookie_max_age_days: 30,
        }
    }
}

impl SessionConfig {
    /// Builds the session manager configuration.
    #[must_use]
    pub fn manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            refresh_horizon: chrono::Duration::seconds(self.refresh_horizon_seconds),
            refresh_timeout: Duration::from_secs(self.refresh_timeout_seconds),
        }
    }
}

/// OAuth client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    pub redirect_url: String,
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// Completion backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub api_key: Option<String>,
    pub preferred_model: String,
    /// Fallback models in priority order (comma-separated in the environment).
    pub fallback_models: Vec<String>,
    /// Whether to ask the backend which models it offers at startup.
    pub discover_models: bool,
    pub max_attempts: u32,
    pub preserve_recent: usize,
    /// Whether compaction may ask a model to summarize.
    pub ai_compaction: bool,
    pub max_context_chars: usize,
    pub max_context_tokens: usize,
    /// Timeout on one summarization call during compaction, in seconds.
    pub summary_timeout_seconds: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        let fallback = FallbackConfig::default();
        let limits = ContextLimits::default();
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            preferred_model: "gpt-4o-mini".to_string(),
            fallback_models: Vec::new(),
            discover_models: false,
            max_attempts: fallback.max_attempts,
            preserve_recent: fallback.preserve_recent,
            ai_compaction: fallback.ai_compaction,
            max_context_chars: limits.max_chars,
            max_context_tokens: limits.max_tokens,
            summary_timeout_seconds: 20,
        }
    }
}

impl AiConfig {
    /// Builds the fallback orchestrator configuration.
    #[must_use]
    pub fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            max_attempts: self.max_attempts.max(1),
            preserve_recent: self.preserve_recent,
            ai_compaction: self.ai_compaction,
            ..FallbackConfig::default()
        }
    }

    /// Timeout on one summarization call.
    #[must_use]
    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_seconds)
    }

    /// Builds the compactor limits.
    #[must_use]
    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            max_chars: self.max_context_chars,
            max_tokens: self.max_context_tokens,
            ..ContextLimits::default()
        }
    }
}

/// Calendar transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub base_url: String,
    /// Calendar the tools operate on.
    pub calendar_id: String,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: GOOGLE_CALENDAR_URL.to_string(),
            calendar_id: "primary".to_string(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ai.fallback_models"),
            )
            .build()?
            .try_deserialize()
    }
}
