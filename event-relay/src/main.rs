//! Event Relay server.
//!
//! Startup order matters: configuration, webhook registration and the queue
//! must all succeed before the listener binds, otherwise the process exits.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use event_relay::{
    connect_backend, register, web, ApiClient, AppState, Config, QueueBuffer, SecretTable,
    EVENT_TYPES,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        port = config.port,
        resource_id = %config.resource_id,
        queue = %config.queue_name,
        receive_batch_size = config.receive_batch_size,
        "config_loaded"
    );

    // Queue first, so a broken backend fails before a webhook is created
    let backend = connect_backend(&config.queue_connection_string, &config.queue_name)
        .context("Failed to configure queue backend")?;
    backend
        .ensure_queue_exists()
        .await
        .context("Failed to create queue")?;
    info!(queue = %config.queue_name, "queue_ready");

    let provider = ApiClient::from_config(&config).context("Failed to create API client")?;
    let registration = register(
        &provider,
        &config.resource_id,
        &config.callback_url(),
        &EVENT_TYPES,
    )
    .await
    .context("Failed to register webhook")?;

    let secrets = SecretTable::from_registration(&registration);
    let buffer = QueueBuffer::new(backend.clone(), config.receive_batch_size);
    info!(batch_size = buffer.batch_size(), "queue_buffer_ready");
    let app = web::router(AppState::new(secrets, buffer));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    backend.close().await;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_shutting_down");
}
