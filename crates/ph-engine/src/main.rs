//! porthole engine daemon
//!
//! Owns the application state and serves the command interface to the CLI
//! and UI bridges over localhost IPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ph_core::config::{self, EngineConfig};
use ph_engine::ipc::IpcServer;
use ph_engine::repository::FileModelRepository;
use ph_engine::session::SimulatedOrchestrator;
use ph_engine::Engine;

#[derive(Parser)]
#[command(name = "ph-engine")]
#[command(about = "porthole engine daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    ipc_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("porthole engine starting...");

    // Load configuration
    let mut config: EngineConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        config::load_config_or_default(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            EngineConfig::default()
        })
    };

    if let Some(port) = args.ipc_port {
        config.ipc_port = port;
    }

    let client = Arc::new(SimulatedOrchestrator::new(config.orchestrator.clone()));
    let repository = Arc::new(FileModelRepository::new(config.model_path()));
    tracing::info!("Model stored at {:?}", repository.path());

    let address = config.ipc_address();
    let engine = Arc::new(Engine::start(config, client, repository));
    let shutdown = engine.shutdown_requested();

    spawn_signal_handler(shutdown.clone());

    let server = IpcServer::new(address, Arc::clone(&engine)).with_shutdown_token(shutdown);
    let result = server.run().await;

    engine.shutdown().await;
    tracing::info!("Engine shutdown complete");
    result
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        shutdown.cancel();
    });
}
