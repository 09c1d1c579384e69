//! WebSocket gateway where nodes announce themselves and stay discoverable
//! while connected.

pub mod config;
pub mod connections;
pub mod http;
pub mod lifecycle;
pub mod nodes;
pub mod observability;

pub use config::GatewayConfig;
pub use connections::{ConnectionId, ConnectionRegistry};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use nodes::{Node, NodeManager, NodeRegistry};
