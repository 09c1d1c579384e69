//! Connection lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Upgraded WebSocket
//!     → registry.rs (open: assign id, split socket, arm watchdog)
//!     → registry.rs (receive_bytes: bounded handshake read)
//!     → registry.rs (stream: frames → event.rs Events, auto pong + refresh)
//!     → registry.rs (close: remove, run close hook, tear down socket)
//!
//! Watchdog (watchdog.rs):
//!     armed on open, re-armed on every ping, expiry → close
//! ```
//!
//! # Design Decisions
//! - Explicit close and watchdog expiry are mutually exclusive via the map
//! - Frame types become a closed enum at the boundary
//! - Errors stay local to the affected connection

pub mod connection;
pub mod event;
pub mod registry;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;
use thiserror::Error;

pub use connection::{CloseCallback, ConnectionGuard, ConnectionId, Socket};
pub use event::Event;
pub use registry::ConnectionRegistry;
pub use watchdog::Expiry;

/// Errors raised by connection registry operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No live connection under this id.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// No handshake frame arrived in time.
    #[error("no handshake received within {0:?}")]
    HandshakeTimeout(Duration),

    /// The handshake frame had the wrong type.
    #[error("expected a binary frame, got {0}")]
    UnexpectedFrame(&'static str),

    /// The peer went away before the handshake completed.
    #[error("peer disconnected")]
    Disconnected,

    /// Socket-level failure while reading or writing.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
}

impl ConnectionError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::NotFound(_) => "not_found",
            ConnectionError::HandshakeTimeout(_) => "timeout",
            ConnectionError::UnexpectedFrame(_) => "unexpected_frame",
            ConnectionError::Disconnected => "disconnected",
            ConnectionError::Transport(_) => "transport",
        }
    }
}
