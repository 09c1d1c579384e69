//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the registries and inject them into handlers
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout)
//! - Serve until shutdown, then close remaining connections

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::connections::ConnectionRegistry;
use crate::http::handlers;
use crate::lifecycle::ShutdownSignal;
use crate::nodes::{NodeManager, NodeRegistry};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionRegistry,
    pub nodes: NodeRegistry,
    pub manager: NodeManager,
}

impl AppState {
    pub fn new(config: &GatewayConfig) -> Self {
        let connections = ConnectionRegistry::new(config.timeouts.idle_timeout());
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(
            connections.clone(),
            nodes.clone(),
            config.timeouts.handshake_timeout(),
        );
        Self {
            connections,
            nodes,
            manager,
        }
    }
}

/// HTTP server for the node gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    /// Create a new server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let state = AppState::new(&config);
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/connect", get(handlers::connect))
            .route("/nodes", get(handlers::list_nodes))
            .route("/health", get(handlers::health))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            handshake_ms = self.config.timeouts.handshake_ms,
            idle_ms = self.config.timeouts.idle_ms,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        self.state.connections.close_all().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Shared state, e.g. for inspecting registries in tests.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
