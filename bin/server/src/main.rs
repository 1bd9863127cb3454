use slotwise_ai::{Compactor, FallbackOrchestrator, ModelRoster, OpenAiBackend};
use slotwise_conversation::ToolCatalog;
use slotwise_integration::{DispatchEngine, GoogleCalendarClient, RateLimitLedger};
use slotwise_server::{
    config::ServerConfig,
    coordinator::Coordinator,
    routes,
    state::{AppState, CookieSettings},
};
use slotwise_session::{
    JsonFileStore, MemoryStore, OAuthClient, SessionManager, SessionPersistence,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env()?;
    tracing::info!("Loaded configuration");

    // Restore sessions, discarding expired ones
    let store: Arc<dyn SessionPersistence> = match &config.session.store_path {
        Some(path) => Arc::new(JsonFileStore::new(path.clone())),
        None => {
            tracing::warn!("SESSION__STORE_PATH not set; sessions will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let tokens = OAuthClient::new(
        config.oauth.client_id.clone(),
        config.oauth.client_secret.clone(),
        config.oauth.token_url.clone(),
        config.oauth.redirect_url.clone(),
    )?;
    let sessions = Arc::new(SessionManager::new(
        store,
        Arc::new(tokens),
        config.session.manager_config(),
    ));
    let restored = sessions.load().await;
    tracing::info!(restored_sessions = restored, "Restored sessions");

    // Completion backend, roster and compaction
    let backend = Arc::new(OpenAiBackend::new(
        config.ai.base_url.clone(),
        config.ai.api_key.clone(),
    )?);
    let compactor = Arc::new(
        Compactor::new(backend.clone(), config.ai.context_limits())
            .with_summary_timeout(config.ai.summary_timeout()),
    );
    let orchestrator = FallbackOrchestrator::new(
        backend,
        ModelRoster::new(
            config.ai.preferred_model.clone(),
            config.ai.fallback_models.clone(),
        ),
        compactor.clone(),
        config.ai.fallback_config(),
    );
    if config.ai.discover_models {
        if let Err(e) = orchestrator.discover().await {
            tracing::warn!(error = %e, "Model discovery failed; using the configured roster");
        }
    }

    // Calendar dispatch
    let calendar = GoogleCalendarClient::new(&config.calendar.base_url)?
        .with_calendar_id(config.calendar.calendar_id.clone());
    let dispatch = DispatchEngine::new(ToolCatalog::calendar(), Arc::new(calendar))
        .with_ledger(RateLimitLedger::new(config.calendar.rate_limit.clone()))
        .with_retry_policy(config.calendar.retry.clone());

    let coordinator = Arc::new(
        Coordinator::new(sessions, compactor, orchestrator, dispatch)
            .with_compaction(config.ai.preserve_recent, config.ai.ai_compaction),
    );

    // Spawn periodic session sweep
    let sweeper = coordinator.clone();
    let sweep_interval_secs = config.session.sweep_interval_seconds.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
        // The first tick completes immediately; startup already discarded
        // expired sessions.
        interval.tick().await;
        loop {
            interval.tick().await;
            let deleted = sweeper.sweep().await;
            if deleted > 0 {
                tracing::info!(deleted_sessions = deleted, "Periodic session sweep");
            }
        }
    });

    let app_state = Arc::new(AppState::new(
        coordinator,
        CookieSettings {
            secure: config.session.secure_cookies,
            max_age_days: config.session.cookie_max_age_days,
        },
    ));

    let app = routes::router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
