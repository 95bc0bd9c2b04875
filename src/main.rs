//! agentjobs - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the job API.

use agentjobs::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentjobs=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?}, model={}, llm={}",
        config.job_store,
        config.llm_model,
        if config.llm_api_key.is_some() {
            "configured"
        } else {
            "disabled"
        }
    );

    api::serve(config).await?;

    Ok(())
}
