//! Node Gateway
//!
//! Peers connect over WebSocket, send their public address once, and stay
//! listed under `GET /nodes` until they disconnect or go idle.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     NODE GATEWAY                     │
//!                 │                                                      │
//!  GET /connect   │  ┌─────────┐   ┌─────────────┐   ┌────────────────┐  │
//!  ───────────────┼─▶│  http   │──▶│    nodes    │──▶│  connections   │  │
//!                 │  │ server  │   │ NodeManager │   │  registry +    │  │
//!                 │  └────┬────┘   └──────┬──────┘   │  watchdogs     │  │
//!                 │       │               │          └────────────────┘  │
//!  GET /nodes     │       │               ▼                              │
//!  ◀──────────────┼───────┴──────▶ ┌──────────────┐                      │
//!                 │                │ NodeRegistry │                      │
//!                 │                └──────────────┘                      │
//!                 │                                                      │
//!                 │   config · observability · lifecycle                 │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use node_gateway::config::{load_config, GatewayConfig};
use node_gateway::lifecycle::{shutdown_signal, Shutdown};
use node_gateway::observability::{logging, metrics};
use node_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "node-gateway")]
#[command(about = "WebSocket gateway for node discovery", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability.log_filter);
    tracing::info!("node-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        handshake_ms = config.timeouts.handshake_ms,
        idle_ms = config.timeouts.idle_ms,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    let server = GatewayServer::new(config);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
