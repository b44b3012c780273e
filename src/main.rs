mod config;
mod dedupe;
mod error;
mod gateway;
mod github;
mod relay;
mod server;
mod update;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dedupe::RecentUpdates;
use crate::gateway::GatewayClient;
use crate::github::GithubClient;
use crate::relay::{spawn_workers, Pipeline, ResultNotifier};
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ghrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration: explicit path argument, else config.toml, else
    // environment variables alone (the container deployment case).
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            let default = PathBuf::from("config.toml");
            if default.exists() {
                info!("Loading configuration from: {}", default.display());
                Config::load(&default)?
            } else {
                info!("No config.toml, reading configuration from environment");
                Config::from_env()?
            }
        }
    };

    info!("Configuration loaded");
    info!("  Gateway: {}", config.telegram.api_base);
    info!("  Local mode: {}", config.telegram.local_mode);
    info!(
        "  Target: {} branch {} prefix {}",
        config.github.repo, config.github.branch, config.github.path_prefix
    );
    info!("  Workers: {}", config.relay.workers);

    let gateway = GatewayClient::new(config.telegram.clone());
    let publisher = GithubClient::new(config.github.clone());
    let pipeline = Arc::new(Pipeline::new(
        gateway.clone(),
        publisher,
        gateway.clone(),
        config.github.clone(),
    ));

    let (tx, rx) = mpsc::channel(config.relay.queue_capacity);
    let _workers = spawn_workers(config.relay.workers, rx, pipeline);

    let state = AppState {
        tx,
        seen: RecentUpdates::new(Duration::from_secs(config.relay.dedupe_window_secs)),
        notifier: Arc::new(gateway) as Arc<dyn ResultNotifier>,
        allowed_extensions: Arc::new(config.github.allowed_extensions.clone()),
    };
    let app = server::router(state);

    let addr = format!("0.0.0.0:{}", config.relay.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
