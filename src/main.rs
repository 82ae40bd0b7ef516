//! ussdgw - USSD Gateway
//!
//! Terminates an SMPP-style binary session protocol over TCP and bridges
//! each inbound message to an HTTP application backend.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use ussdgw_server::{Config, Dispatcher, HttpGateway, Server, ServerConfig, StaticCredentials};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if USSDGW_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("USSDGW_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("USSDGW_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting USSD gateway");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Application URL: {}", config.application.base_url);
    tracing::info!("  Accepted system_id: {}", config.auth.system_id);

    let credentials = Arc::new(StaticCredentials::from(&config.auth));
    let gateway = Arc::new(HttpGateway::new(
        config.application.base_url.clone(),
        config.application.timeout(),
    )?);

    let dispatcher = Dispatcher::new(credentials, gateway, config.auth.server_system_id.clone());
    let server = Arc::new(Server::new(ServerConfig::from(&config), dispatcher));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
