//! Sendspin Server - standalone headless server implementing the Sendspin
//! synchronized multi-room audio streaming protocol.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sendspin_core::{bootstrap_services, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Sendspin Server - headless Sendspin protocol server.
#[derive(Parser, Debug)]
#[command(name = "sendspin-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SENDSPIN_LOG_LEVEL")]
    log_level: String,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "SENDSPIN_BIND_PORT")]
    port: Option<u16>,

    /// Bind address (overrides config file).
    #[arg(short = 'b', long, env = "SENDSPIN_BIND_ADDR")]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sendspin-server starting");

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("failed to bootstrap services")?;
    tracing::info!("services bootstrapped");

    let app_state = AppState::builder()
        .config(Arc::new(core_config))
        .registry(Arc::clone(&services.registry))
        .ws_manager(Arc::clone(&services.ws_manager))
        .spawner(Arc::new(services.spawner.clone()) as Arc<dyn sendspin_core::TaskSpawner>)
        .supported_roles(config.supported_roles.clone())
        .build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = sendspin_core::start_server(app_state).await {
            tracing::error!(error = %e, "server error");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    server_handle.abort();

    tracing::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
