//! HTTP server lifecycle.

use super::{
    middleware::{create_cors_layer, create_timeout_layer, request_logger, timeout_json},
    routes::create_router,
    AppState,
};
use axum::{extract::DefaultBodyLimit, middleware, Router};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Room for multipart boundaries and the text fields next to the file.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Listen address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Router plus the middleware stack. CORS is the outermost layer so even
/// timeouts and rejected bodies carry CORS headers, and the request logger
/// sits outside the timeout so timed-out requests are logged too.
pub fn create_app(state: AppState) -> Router {
    let config = state.beautifier.config();
    let body_limit = config.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    // Colorizing a whole document waits on several upstream calls.
    let timeout_secs = config.api_timeout_secs.saturating_mul(2);

    create_router(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(create_timeout_layer(Duration::from_secs(timeout_secs)))
        .layer(middleware::map_response(timeout_json))
        .layer(middleware::from_fn(request_logger))
        .layer(create_cors_layer())
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn start_server(config: ServerConfig, state: AppState) -> std::io::Result<()> {
    info!(
        "Task store: {}, DeepSeek: {}, colorize: {}",
        state.beautifier.store().backend_name(),
        if state.beautifier.deepseek().is_some() { "on" } else { "off" },
        if state.beautifier.colorize_configured() { "on" } else { "off" },
    );
    if let Some(dir) = &state.static_dir {
        info!("Serving static files from {}", dir.display());
    }

    let app = create_app(state);
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = wait_for_ctrl_c() => info!("Received Ctrl+C signal"),
        _ = wait_for_sigterm() => info!("Received SIGTERM signal"),
    }
    info!("Starting graceful shutdown...");
}

async fn wait_for_ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Windows has no SIGTERM; Ctrl+C is the only signal.
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
