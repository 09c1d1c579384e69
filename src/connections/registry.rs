//! Registry of live connections.
//!
//! # Responsibilities
//! - Accept upgraded sockets and assign connection IDs
//! - Translate inbound frames into [`Event`]s, answering pings
//! - Evict connections that stay idle past the configured window
//! - Close each connection exactly once, whichever path gets there first
//!
//! # Design Decisions
//! - Removal from the map is the single gate for teardown: explicit close and
//!   watchdog expiry both race for it, and only the winner runs side effects
//! - Map guards are never held across an `.await`
//! - Each watchdog arming has a generation; expiry only evicts if the stored
//!   watchdog is still the one that fired

use axum::body::Bytes;
use axum::extract::ws::Message;
use dashmap::DashMap;
use futures_util::{stream, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use super::connection::{
    CloseCallback, Connection, ConnectionGuard, ConnectionId, Inbound, Outbound, Socket,
};
use super::event::{frame_kind, Event};
use super::watchdog::{Expiry, Watchdog};
use super::ConnectionError;
use crate::observability::metrics;

/// Owns every live connection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    connections: DashMap<ConnectionId, Connection>,
    idle_timeout: Duration,
    generation: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry evicting connections idle for `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                idle_timeout,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Take ownership of an upgraded socket and start its watchdog.
    pub fn open<S: Socket>(
        &self,
        socket: S,
        remote_addr: SocketAddr,
        close_callback: Option<CloseCallback>,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let (outbound, inbound) = socket.split();
        let inbound: Inbound = inbound.boxed();
        let outbound: Outbound = Box::pin(outbound);
        let (closed, _) = watch::channel(false);

        let connection = Connection {
            remote_addr,
            inbound: Arc::new(Mutex::new(inbound)),
            outbound: Arc::new(Mutex::new(outbound)),
            close_callback,
            watchdog: self.arm_watchdog(id),
            closed,
            hangup: Arc::new(AtomicBool::new(false)),
        };
        self.inner.connections.insert(id, connection);

        metrics::record_connection_opened(self.len());
        tracing::info!(connection_id = %id, remote_addr = %remote_addr, "Handling new connection");
        id
    }

    /// Close a connection. Unknown or already closed ids are a no-op.
    ///
    /// The close callback runs before the socket is torn down.
    pub async fn close(&self, id: ConnectionId) -> Result<(), ConnectionError> {
        let Some((_, connection)) = self.inner.connections.remove(&id) else {
            return Ok(());
        };
        self.teardown(id, connection).await
    }

    /// Close every live connection.
    pub async fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.inner.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(e) = self.close(id).await {
                tracing::debug!(connection_id = %id, error = %e, "Close during shutdown failed");
            }
        }
    }

    /// Restart the idle window of a connection.
    pub fn refresh(&self, id: ConnectionId) -> Result<(), ConnectionError> {
        let mut connection = self
            .inner
            .connections
            .get_mut(&id)
            .ok_or(ConnectionError::NotFound(id))?;
        // Replacing drops the previous watchdog, which cancels it.
        connection.watchdog = self.arm_watchdog(id);
        tracing::trace!(connection_id = %id, "Connection refreshed");
        Ok(())
    }

    /// Wait up to `timeout` for one binary frame.
    ///
    /// Returns `NotFound` as soon as the connection is closed locally.
    pub async fn receive_bytes(
        &self,
        id: ConnectionId,
        timeout: Duration,
    ) -> Result<Bytes, ConnectionError> {
        let (inbound, mut closed, hangup) = {
            let connection = self
                .inner
                .connections
                .get(&id)
                .ok_or(ConnectionError::NotFound(id))?;
            (
                connection.inbound.clone(),
                connection.closed.subscribe(),
                connection.hangup.clone(),
            )
        };

        let read = tokio::time::timeout(timeout, async {
            let mut inbound = inbound.lock().await;
            tokio::select! {
                biased;
                _ = closed.changed() => None,
                frame = inbound.next() => Some(frame),
            }
        })
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout(timeout))?;
        // Closed locally while waiting.
        let Some(frame) = read else {
            return Err(ConnectionError::NotFound(id));
        };

        match frame {
            Some(Ok(Message::Binary(payload))) => Ok(payload),
            Some(Ok(Message::Close(_))) => Err(ConnectionError::Disconnected),
            None => {
                hangup.store(true, Ordering::Release);
                Err(ConnectionError::Disconnected)
            }
            Some(Ok(other)) => Err(ConnectionError::UnexpectedFrame(frame_kind(&other))),
            Some(Err(e)) => {
                hangup.store(true, Ordering::Release);
                Err(ConnectionError::Transport(e))
            }
        }
    }

    /// Lazily yield events for a connection until it ends.
    ///
    /// Pings are answered with a pong and refresh the watchdog before the
    /// `Ping` event is yielded. Unknown ids give an empty stream.
    pub fn stream(&self, id: ConnectionId) -> impl Stream<Item = Event> + Send + 'static {
        let source = self.inner.connections.get(&id).map(|connection| EventSource {
            registry: self.clone(),
            id,
            inbound: connection.inbound.clone(),
            closed: connection.closed.subscribe(),
            hangup: connection.hangup.clone(),
        });

        stream::unfold(source, |source| async move {
            let mut source = source?;
            let event = source.next_event().await?;
            Some((event, Some(source)))
        })
    }

    pub fn remote_addr(&self, id: ConnectionId) -> Result<SocketAddr, ConnectionError> {
        self.inner
            .connections
            .get(&id)
            .map(|connection| connection.remote_addr)
            .ok_or(ConnectionError::NotFound(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Wrap an open connection so it is closed on every exit path.
    pub fn scope(&self, id: ConnectionId) -> ConnectionGuard {
        ConnectionGuard::new(self.clone(), id)
    }

    fn arm_watchdog(&self, id: ConnectionId) -> Watchdog {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();
        Watchdog::arm(id, generation, self.inner.idle_timeout, async move {
            registry.expire(id, generation).await
        })
    }

    async fn expire(&self, id: ConnectionId, generation: u64) -> Result<Expiry, ConnectionError> {
        let removed = self
            .inner
            .connections
            .remove_if(&id, |_, connection| connection.watchdog.generation() == generation);
        let Some((_, connection)) = removed else {
            return Ok(Expiry::Superseded);
        };
        metrics::record_eviction();
        self.teardown(id, connection).await?;
        Ok(Expiry::Evicted)
    }

    async fn teardown(&self, id: ConnectionId, connection: Connection) -> Result<(), ConnectionError> {
        tracing::info!(connection_id = %id, "Closing connection");
        metrics::record_connection_closed(self.len());

        let Connection {
            outbound,
            close_callback,
            watchdog,
            closed,
            hangup,
            ..
        } = connection;

        watchdog.cancel();
        closed.send_replace(true);

        if let Some(callback) = close_callback {
            callback(id);
        }

        if hangup.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut outbound = outbound.lock().await;
        outbound.close().await?;
        Ok(())
    }

    async fn pong(&self, id: ConnectionId, payload: Bytes) -> Result<(), ConnectionError> {
        let outbound = self
            .inner
            .connections
            .get(&id)
            .map(|connection| connection.outbound.clone())
            .ok_or(ConnectionError::NotFound(id))?;
        let mut outbound = outbound.lock().await;
        outbound.send(Message::Pong(payload)).await?;
        Ok(())
    }
}

/// Per-stream cursor over one connection's inbound half.
struct EventSource {
    registry: ConnectionRegistry,
    id: ConnectionId,
    inbound: Arc<Mutex<Inbound>>,
    closed: watch::Receiver<bool>,
    hangup: Arc<AtomicBool>,
}

impl EventSource {
    async fn next_event(&mut self) -> Option<Event> {
        if *self.closed.borrow() {
            return None;
        }

        let frame = {
            let mut inbound = self.inbound.lock().await;
            tokio::select! {
                biased;
                _ = self.closed.changed() => return None,
                frame = inbound.next() => frame,
            }
        };

        match frame {
            None => {
                tracing::debug!(connection_id = %self.id, "Peer closed transport");
                self.hangup.store(true, Ordering::Release);
                None
            }
            Some(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Transport error");
                self.hangup.store(true, Ordering::Release);
                None
            }
            Some(Ok(Message::Ping(payload))) => {
                if let Err(e) = self.registry.pong(self.id, payload).await {
                    tracing::debug!(connection_id = %self.id, error = %e, "Failed to answer ping");
                    return None;
                }
                if self.registry.refresh(self.id).is_err() {
                    return None;
                }
                Some(Event::Ping)
            }
            Some(Ok(message)) => Some(Event::from(message)),
        }
    }
}
