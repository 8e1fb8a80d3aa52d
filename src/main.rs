// CineCircle server entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config and require a signing secret
// 3. Build shared state (database, TMDB client, presence registry)
// 4. Spawn the WebSocket gateway task
// 5. Serve the HTTP API until shutdown is signalled

use std::sync::Arc;

use anyhow::Context;
use cinecircle::config;
use cinecircle::routes;
use cinecircle::state::AppState;
use cinecircle::tmdb::Tmdb;
use cinecircle::ws_server;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("cinecircle starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        port = config.port,
        ws_port = config.ws_port,
        db_path = %config.db_path,
        "config loaded"
    );
    if config
        .credentials
        .jwt_secret
        .as_deref()
        .is_none_or(str::is_empty)
    {
        anyhow::bail!("jwt_secret missing from config/credentials.toml");
    }

    // 3. Build shared state
    std::fs::create_dir_all(&config.media_dir)
        .with_context(|| format!("failed to create media directory {}", config.media_dir))?;
    let state = AppState::new(config).context("failed to build application state")?;
    match &state.tmdb {
        Tmdb::Active(_) => info!("TMDB client initialized (API key configured)"),
        Tmdb::Disabled => info!("TMDB client disabled (no API key); movie endpoints answer 500"),
    }

    // 4. Spawn the WebSocket gateway
    let ws_addr = format!("0.0.0.0:{}", state.config.ws_port);
    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket gateway on {ws_addr}"))?;
    let ws_handle = tokio::spawn({
        let state = state.clone();
        async move {
            if let Err(e) = ws_server::run(state, ws_listener).await {
                error!("WebSocket gateway error: {e:#}");
            }
        }
    });

    // 5. Serve the HTTP API
    let http_addr = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {http_addr}"))?;
    info!("HTTP API listening on {http_addr}");

    let app = routes::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    ws_handle.abort();
    info!("cinecircle shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cinecircle=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
