//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::service::QueueService;
use crate::sweeper::spawn_sweeper;

use super::routes::routes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Start the HTTP server with provided service.
pub async fn serve(config: ServerConfig, service: Arc<QueueService>) -> anyhow::Result<()> {
    let shutdown = service.shutdown_token();
    let app = routes(Arc::clone(&service));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    let sweeper = spawn_sweeper(Arc::clone(&service));

    info!(
        hold_limit = ?service.config().hold_limit,
        "Starting viewgate server on {}", actual_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server shutdown complete");

    // Stop the sweeper if shutdown came from a signal rather than the token.
    service.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }

    Ok(())
}

/// Resolves on SIGINT, SIGTERM or cancellation of the service token.
///
/// # Panics
///
/// Panics if the signal handlers cannot be installed, which means the tokio
/// runtime is misconfigured.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested...");
        }
    }
}
