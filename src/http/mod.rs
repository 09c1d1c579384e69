//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → handlers.rs
//!         GET /connect → WebSocket upgrade → NodeManager::serve
//!         GET /nodes   → NodeRegistry::address_map as JSON
//!         GET /health  → status and counts
//! ```

pub mod handlers;
pub mod server;

pub use handlers::GatewayError;
pub use server::{AppState, GatewayServer};
