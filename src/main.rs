//! shark-server: request/response server for the stock portfolio service
//!
//! Clients hold a persistent TCP connection and exchange length-prefixed
//! JSON messages, one response per request, selected from a closed set of
//! operations.
//!
//! Features:
//! - One task per connection, isolated from malformed input and handler failures
//! - Automatic shutdown after a configurable period without clients
//! - Single idempotent shutdown on idle, signal or startup failure
//! - Configuration via CLI arguments or TOML file

mod activity;
mod backend;
mod config;
mod connection;
mod monitor;
mod operation;
mod protocol;
mod registry;
mod server;
mod shutdown;

use backend::MemoryBackend;
use config::Config;
use server::Server;
use shutdown::{ShutdownCoordinator, ShutdownReason};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for blocking handler threads when the runtime stops.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration. Nothing is running yet, so a failure exits directly.
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        read_timeout_ms = config.read_timeout_ms,
        monitor_interval_ms = config.monitor_interval_ms,
        idle_shutdown_ms = config.idle_shutdown_ms,
        "Starting shark-server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(async {
        let server = Server::new(config, Arc::new(MemoryBackend::new()));
        tokio::spawn(watch_signals(Arc::clone(server.coordinator())));
        server.run().await
    });

    // Handler threads still inside a blocking call are abandoned.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let reason = outcome?;
    info!(%reason, "Exiting");
    Ok(())
}

/// Request shutdown on Ctrl-C or, on Unix, SIGTERM.
async fn watch_signals(coordinator: Arc<ShutdownCoordinator>) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("Termination signal received");
    coordinator.shutdown(ShutdownReason::Signal);
}
