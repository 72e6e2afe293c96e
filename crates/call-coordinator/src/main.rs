//! Call coordinator service.
//!
//! Stateless process boundary around per-room actors: accepts one
//! websocket per (room, participant), applies actions to the room's
//! authoritative state and rebroadcasts events.
//!
//! # Startup flow
//!
//! 1. Initialize tracing from `RUST_LOG`
//! 2. Load configuration from environment
//! 3. Build storage backend and room directory
//! 4. Serve the websocket router
//! 5. Wait for shutdown signal, then cancel all rooms

#![warn(clippy::pedantic)]

use std::sync::Arc;

use call_coordinator::config::Config;
use call_coordinator::directory::RoomDirectory;
use call_coordinator::storage::MemoryStorage;
use call_coordinator::ws;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting call coordinator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        empty_grace_seconds = config.empty_grace.as_secs(),
        "Configuration loaded successfully"
    );

    // In-memory storage by default; a durable backend plugs in behind
    // the same RoomStorage trait.
    let storage = Arc::new(MemoryStorage::new());
    let shutdown_token = CancellationToken::new();
    let directory = Arc::new(RoomDirectory::new(
        storage,
        config.empty_grace,
        shutdown_token.clone(),
    ));

    let app = ws::router(directory);

    // Bind before serving to fail fast on bind errors.
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind");
            e
        })?;
    info!(addr = %config.bind_address, "Coordinator listening");

    let serve_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            serve_token.cancel();
        })
        .await?;

    info!("Call coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the
/// service cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
