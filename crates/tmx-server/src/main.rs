//! Server binary.

use std::net::SocketAddr;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tmx_server::{create_router, health_router, AppState, ServerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tmx=info,tmx_server=info")),
        )
        .init();

    info!("starting tmx-server");

    let config = ServerConfig::from_env();
    info!(
        host = %config.ws_host,
        port = config.ws_port,
        workers = config.workers,
        "server config loaded"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.work_root).await {
        error!(root = %config.work_root.display(), "cannot create work root: {e}");
        std::process::exit(1);
    }
    if tmx_media::check_ffmpeg().is_err() {
        warn!("ffmpeg not found in PATH; jobs will fail until it is installed");
    }

    let ws_addr: SocketAddr = format!("{}:{}", config.ws_host, config.ws_port)
        .parse()
        .expect("invalid WebSocket bind address");
    let health_addr: SocketAddr = format!("{}:{}", config.ws_host, config.health_port)
        .parse()
        .expect("invalid health bind address");

    let state = AppState::new(config);

    // Health probe on its own port.
    let health_app = health_router(state.clone());
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(health_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind health port {health_addr}: {e}");
                return;
            }
        };
        info!("health probe listening on {health_addr}");
        if let Err(e) = axum::serve(listener, health_app).await {
            error!("health server error: {e}");
        }
    });

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .expect("failed to bind WebSocket port");
    info!("listening on {ws_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    state.manager.shutdown();
    info!("server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("received shutdown signal");
}
