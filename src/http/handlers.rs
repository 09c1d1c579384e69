//! Route handlers.

use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, ConnectInfo, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;

use crate::http::server::AppState;

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[from] WebSocketUpgradeRejection),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Rejecting connection");
        match self {
            GatewayError::Upgrade(rejection) => rejection.into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub nodes: usize,
}

/// `GET /connect`: upgrade and hand the socket to the node manager.
pub async fn connect(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    let upgrade = upgrade?;
    Ok(upgrade
        .on_failed_upgrade(move |e| {
            tracing::warn!(remote_addr = %remote_addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            state.manager.serve(socket, remote_addr).await;
        }))
}

/// `GET /nodes`: public address → IP address of every registered node.
pub async fn list_nodes(State(state): State<AppState>) -> Json<HashMap<String, String>> {
    Json(state.nodes.address_map())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connections.len(),
        nodes: state.nodes.len(),
    })
}
