//! HTTP server wiring: state construction, router assembly, startup.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::bank::QuestionBank;
use crate::config::EventConfig;
use crate::judge::execution::ExecutionJudge;
use crate::judge::policy::CodeJudge;
use crate::judge::simulated::SimulatedJudge;
use crate::session::store::{ProgressStore, StoreHandle};

use api::AppState;

/// Configuration for the event server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub bank_path: Option<PathBuf>,
    pub event: EventConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4200,
            db_path: PathBuf::from("gauntlet.db"),
            bank_path: None,
            event: EventConfig::default(),
        }
    }
}

/// Build the application router. The frontend is served separately, so
/// CORS stays permissive.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the event server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let store = StoreHandle::new(
        ProgressStore::open(&config.db_path).context("Failed to initialize progress store")?,
    );
    let bank = Arc::new(
        QuestionBank::load_or_default(config.bank_path.as_deref())
            .context("Failed to load question bank")?,
    );
    let shutdown = CancellationToken::new();

    let execution = Arc::new(ExecutionJudge::new(config.event.execution_config()));
    let model = Arc::new(SimulatedJudge::new(config.event.simulated_config()));
    let judge = Arc::new(CodeJudge::new(execution, model));

    let state = Arc::new(AppState {
        store,
        bank,
        judge,
        config: config.event,
        shutdown: shutdown.clone(),
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "event server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutting down");
    // Stops in-flight judging before the listener drains.
    shutdown.cancel();
}
