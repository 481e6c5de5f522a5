//! One Engine - main entry point.

use anyhow::Result;
use one_common::config::Config;
use one_common::logging::init_logging;
use one_engine::routes::{build_router, AppState};
use one_engine::ConversationEngine;
use one_llm::{CompatibleProvider, Provider};
use one_session::{SessionStore, SqliteSessionStore};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("One Engine v{}", env!("CARGO_PKG_VERSION"));

    let session_timeout = Duration::from_secs(config.session.timeout_secs);
    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(
        config.session.resolve_db_path(),
        session_timeout,
        config.session.context_window,
    )?);

    let provider: Arc<dyn Provider> = Arc::new(CompatibleProvider::deepseek(
        &config.llm.base_url,
        config.llm.api_key.as_deref(),
    ));

    let engine = Arc::new(ConversationEngine::new(
        provider,
        store.clone(),
        &config,
    ));

    // Periodic sweep: lazily-expired sessions also get their workflow
    // fields cleared in the store.
    let sweep_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = sweep_store.expire_stale_sessions(session_timeout).await {
                tracing::warn!(error = %e, "Session expiry sweep failed");
            }
        }
    });

    let app = build_router(AppState { engine })
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    tracing::info!(addr = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
