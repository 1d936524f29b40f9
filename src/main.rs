//! switchboard server entry point

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchboard::{routes, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("SWITCHBOARD_CONFIG").unwrap_or_else(|_| "config.yml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("error loading configuration from {config_path}"))?;

    init_tracing(&config);
    info!(path = %config_path, "configuration loaded");

    routes::metrics::init_metrics();

    let state = Arc::new(AppState::new(config.clone())?);
    state.registry.spawn_sweeper();
    log_available_engines(&state);

    let app = routes::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server host/port")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("server has been stopped gracefully");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchboard={}", config.logging.level)));

    if config.logging.format.eq_ignore_ascii_case("json") || config.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn log_available_engines(state: &AppState) {
    let available = state.registry.available();
    if available.is_empty() {
        warn!("no engines available - check your API key configuration");
        return;
    }
    info!(engines = ?available.iter().map(|t| t.as_str()).collect::<Vec<_>>(), "available engines");

    for tag in switchboard::engine::EngineTag::all() {
        if available.contains(&tag) {
            continue;
        }
        if state.config.engines.contains_key(tag.as_str()) {
            info!(engine = %tag, "configured but missing credentials");
        } else {
            info!(engine = %tag, "not configured");
        }
    }
}

/// Resolve on SIGINT/SIGTERM; flips the health flag first so load
/// balancers drain before the listener closes.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C, initiating shutdown"),
        _ = terminate => warn!("received SIGTERM, initiating shutdown"),
    }

    state.healthy.store(false, Ordering::SeqCst);
    warn!("health status set to unhealthy");
}
