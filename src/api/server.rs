use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

use super::{
    services::{dead_letters, detect_upload, health, metrics, submit_urls},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submissions", post(submit_urls))
        .route("/detections", post(detect_upload))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/dead-letters", get(dead_letters))
        .with_state(state)
        // Gzip request bodies are decoded before handlers see them
        .layer(RequestDecompressionLayer::new())
}

/// Serve the API until `shutdown` resolves
pub async fn run<F>(address: SocketAddr, state: AppState, shutdown: F) -> Result<(), AnyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "crowdcount API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
