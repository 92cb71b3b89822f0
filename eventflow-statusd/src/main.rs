mod config;
mod error;
mod store;
mod backend;
mod ingest;
mod consumers;
mod probe;
mod session;
mod api;
#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::backend::BackendClient;
use crate::consumers::actions::ActionDispatcher;
use crate::config::Config;
use crate::session::Session;

const DEFAULT_CONFIG_PATH: &str = "/etc/eventflow/statusd.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("eventflow_statusd=info"))
        )
        .init();

    tracing::info!("Starting eventflow-statusd");

    // Load config; an explicit path must exist, the default one may be absent
    let explicit = std::env::args().nth(1);
    let config_path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if explicit.is_some() || Path::new(&config_path).exists() {
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?;
        tracing::info!("Loaded config from {}", config_path);
        config
    } else {
        tracing::info!("No config at {}, using defaults", config_path);
        Config::default()
    };
    config.apply_env();

    let client = BackendClient::new(config.backend.base_url.clone())
        .context("Failed to build backend client")?;
    tracing::info!("Backend at {}", client.base_url());

    let (writer, status) = store::status_store();
    let session = Session::new(config.backend.token.clone());
    if !session.is_authenticated() {
        tracing::info!("No credential yet, waiting for PUT /v1/session");
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn ingestion supervisor
    let (ingest_handle, ingest_task) = ingest::spawn(
        client.clone(),
        config.service_ids(),
        writer,
        session.subscribe(),
        ingest::Timing::from(&config.ingestion),
        cancel.clone(),
    );

    let actions = ActionDispatcher::new(
        client.clone(),
        session.clone(),
        status.clone(),
        config.service_ids(),
        Duration::from_secs(config.actions.pending_timeout_secs),
    );

    // Build API router
    let app_state = api::routes::AppState {
        status,
        ingest: ingest_handle,
        actions,
        session,
        client,
        catalog: Arc::new(config.services.clone()),
        probe_timeout: Duration::from_secs(config.probes.timeout_secs),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let (ingest_result, server_result) = tokio::join!(ingest_task, server_handle);
    if let Err(e) = ingest_result {
        tracing::error!("Ingestion task failed: {}", e);
    }
    if let Err(e) = server_result {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
