//! Chat Server Library
//!
//! Two-party chat: accounts, SQLite message history, and live delivery plus
//! online presence over a WebSocket.

pub mod chat;
pub mod core;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::chat::presence::PresenceRegistry;
use crate::core::auth::AuthManager;
use crate::core::store::MessageStore;
use crate::core::{AppState, ServerConfig};

/// Open storage and build the shared state for `config`.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    config.ensure_dirs().await?;

    let pool = crate::core::db::connect(&config.db_path()).await?;

    let auth = Arc::new(AuthManager::new(pool.clone(), config.session_ttl_days));
    info!("Auth Manager initialized");

    let messages = Arc::new(MessageStore::new(pool));
    info!("Message Store initialized");

    Ok(AppState {
        config,
        auth,
        messages,
        presence: Arc::new(PresenceRegistry::new()),
    })
}

/// Full application router.
pub fn app(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route("/api/status", get(status))
        .merge(crate::core::router(state.clone()))
        .merge(chat::router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_server=info,tower_http=info".into()),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Chat Server ===");

    let config = ServerConfig::from_env();
    info!("Data directory: {:?}", config.data_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = build_state(config).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Chat server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Chat server stopped");
    Ok(())
}

async fn status() -> &'static str {
    "Server is running"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
