//! Connection identity and per-connection state.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Hold the split socket halves, watchdog and close hook of one session
//! - Guarantee teardown on every exit path via [`ConnectionGuard`]

use axum::extract::ws::Message;
use futures_util::stream::BoxStream;
use futures_util::{Sink, Stream};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::watchdog::Watchdog;
use super::ConnectionError;

/// Unique identifier for a connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bidirectional message socket the registry can own.
///
/// Implemented by axum's `WebSocket`; anything else with the same shape
/// (e.g. an in-memory pair) works too.
pub trait Socket:
    Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send + 'static
{
}

impl<T> Socket for T where
    T: Stream<Item = Result<Message, axum::Error>>
        + Sink<Message, Error = axum::Error>
        + Send
        + 'static
{
}

/// Hook run with the connection's id while it is being closed.
pub type CloseCallback = Box<dyn FnOnce(ConnectionId) + Send + Sync>;

pub(crate) type Inbound = BoxStream<'static, Result<Message, axum::Error>>;
pub(crate) type Outbound = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// One live transport session, owned by the registry.
pub(crate) struct Connection {
    pub remote_addr: SocketAddr,
    pub inbound: Arc<Mutex<Inbound>>,
    pub outbound: Arc<Mutex<Outbound>>,
    pub close_callback: Option<CloseCallback>,
    pub watchdog: Watchdog,
    /// Flipped to `true` once the connection leaves the registry.
    pub closed: watch::Sender<bool>,
    /// Set when the transport ended or failed, so teardown skips the socket.
    pub hangup: Arc<AtomicBool>,
}

/// Scoped ownership of a registered connection.
///
/// Call [`ConnectionGuard::close`] on the normal path. If the guard is
/// dropped instead (error, panic, task cancellation), the close is spawned
/// onto the current runtime.
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
    released: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(registry: ConnectionRegistry, id: ConnectionId) -> Self {
        Self {
            registry,
            id,
            released: false,
        }
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Close the connection now.
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        self.released = true;
        self.registry.close(self.id).await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(connection_id = %self.id, "No runtime to close dropped connection");
            return;
        };
        let registry = self.registry.clone();
        let id = self.id;
        handle.spawn(async move {
            if let Err(e) = registry.close(id).await {
                tracing::debug!(connection_id = %id, error = %e, "Close after drop failed");
            }
        });
    }
}
