//! Router, shared state and server lifecycle.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::jobs;
use super::types::HealthResponse;
use crate::config::Config;
use crate::events::EventBus;
use crate::orchestrator::Orchestrator;
use crate::store::create_job_store;
use crate::watchdog::StaleJobWatchdog;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/jobs/:id", get(jobs::get_job))
        .route("/api/jobs/:id/approve", post(jobs::approve_job))
        .route(
            "/api/jobs/:id/revisions",
            post(jobs::create_revision).get(jobs::list_revisions),
        )
        .route("/api/jobs/:id/plan", get(jobs::get_plan))
        .route("/api/jobs/:id/trace", get(jobs::get_trace))
        .route("/api/jobs/:id/artifacts", get(jobs::get_artifacts))
        .route("/api/jobs/:id/ai-calls", get(jobs::get_ai_calls))
        .route("/api/jobs/:id/stream", get(jobs::stream_job))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and the stale-job watchdog.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_job_store(config.job_store, config.data_dir.clone()).await?;
    if !store.is_persistent() {
        tracing::warn!("Using in-memory job store; jobs are lost on restart");
    }
    let bus = EventBus::default();
    let orchestrator = Orchestrator::from_config(&config, store.clone(), bus.clone())?;
    let watchdog = StaleJobWatchdog::from_config(&config, store, bus).start();

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, orchestrator));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watchdog.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    // Running jobs are left as-is; the next process's startup sweep fails
    // them once they go stale.
    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        persistent: state.orchestrator.store().is_persistent(),
        agents: state.orchestrator.agents().descriptors(),
    })
}
