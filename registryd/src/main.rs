mod api;
mod config;
mod context;
mod datasource;
mod error;
mod quota;
mod registry;
mod uniqueness;
mod version;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::datasource::driver::{DriverRegistry, Options};
use crate::registry::RegistryService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registryd=info"))
        )
        .init();

    tracing::info!("Starting registryd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/registryd/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Bind the storage driver once; nothing consults the driver registry afterwards
    let mut drivers = DriverRegistry::with_builtin();
    let datasource = drivers
        .init(&Options::from_config(&config))
        .with_context(|| format!("Failed to initialize datasource (available: {:?})", drivers.kinds()))?;

    let registry = RegistryService::new(
        datasource.clone(),
        config.registry.namespace_policy,
        config.quota.clone(),
    );
    tracing::info!(
        "Registry ready: driver {}, namespace policy {:?}",
        drivers.active_kind().unwrap_or_default(),
        config.registry.namespace_policy
    );

    let cancel = CancellationToken::new();

    let app = api::routes::router(api::routes::AppState {
        registry,
        shutdown: cancel.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = server_handle.await;

    if let Err(e) = datasource.close().await {
        tracing::error!("Failed to close datasource: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
