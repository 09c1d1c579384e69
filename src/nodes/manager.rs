//! Drives one connection from handshake to unregistration.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::time::Duration;

use futures_util::StreamExt;

use crate::connections::{CloseCallback, ConnectionError, ConnectionId, ConnectionRegistry, Event, Socket};
use crate::nodes::registry::{Node, NodeRegistry};
use crate::observability::metrics;

/// Turns accepted connections into registered nodes and removes them again.
#[derive(Clone)]
pub struct NodeManager {
    connections: ConnectionRegistry,
    nodes: NodeRegistry,
    handshake_timeout: Duration,
}

impl NodeManager {
    pub fn new(connections: ConnectionRegistry, nodes: NodeRegistry, handshake_timeout: Duration) -> Self {
        Self {
            connections,
            nodes,
            handshake_timeout,
        }
    }

    /// Own an upgraded socket for its whole lifetime.
    ///
    /// The connection is closed on return, on error, and if this future is
    /// dropped mid-flight.
    pub async fn serve<S: Socket>(&self, socket: S, remote_addr: SocketAddr) {
        let id = self
            .connections
            .open(socket, remote_addr, Some(self.disconnect_hook()));
        let guard = self.connections.scope(id);

        if let Err(e) = self.handle(id).await {
            tracing::info!(connection_id = %id, remote_addr = %remote_addr, error = %e, "Handshake failed");
        }

        if let Err(e) = guard.close().await {
            tracing::debug!(connection_id = %id, error = %e, "Close after session failed");
        }
    }

    /// Handshake, register, then follow the event stream until it ends.
    pub async fn handle(&self, id: ConnectionId) -> Result<(), ConnectionError> {
        let remote_addr = self.connections.remote_addr(id)?;
        let payload = match self.connections.receive_bytes(id, self.handshake_timeout).await {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_handshake_failure(e.reason());
                return Err(e);
            }
        };
        let Some(node) = self.register(id, &payload, remote_addr) else {
            return Ok(());
        };
        tracing::info!(connection_id = %id, node = %node, "Node registered");

        let events = self.connections.stream(id);
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            if self.handle_event(id, event).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Add the node for a completed handshake.
    ///
    /// Gives `None` when the connection went away in the meantime; the node
    /// is removed again so it never outlives its connection.
    fn register(&self, id: ConnectionId, payload: &[u8], remote_addr: SocketAddr) -> Option<Node> {
        let node = self
            .nodes
            .add(id, hex::encode(payload), remote_addr.ip().to_string());
        // The close hook may have run before the add.
        if !self.connections.contains(id) {
            self.on_disconnect(id);
            return None;
        }
        Some(node)
    }

    fn handle_event(&self, id: ConnectionId, event: Event) -> ControlFlow<()> {
        match event {
            Event::Ping => ControlFlow::Continue(()),
            Event::Close => {
                match self.nodes.get(&id) {
                    Ok(node) => tracing::info!(connection_id = %id, node = %node, "Node disconnected"),
                    Err(e) => tracing::debug!(connection_id = %id, error = %e, "Close from unregistered connection"),
                }
                self.on_disconnect(id);
                ControlFlow::Break(())
            }
            Event::Data(_) | Event::Other => {
                tracing::debug!(connection_id = %id, event = %event, "Unsupported frame, ending session");
                ControlFlow::Break(())
            }
        }
    }

    /// Remove the node for `id`. Safe to call from every termination path.
    pub fn on_disconnect(&self, id: ConnectionId) {
        unregister(&self.nodes, id);
    }

    /// Close hook that unregisters the node when its connection goes away.
    ///
    /// Holds only the node registry: the connection registry owns the hook.
    pub fn disconnect_hook(&self) -> CloseCallback {
        let nodes = self.nodes.clone();
        Box::new(move |id| unregister(&nodes, id))
    }
}

fn unregister(nodes: &NodeRegistry, id: ConnectionId) {
    if let Some(node) = nodes.remove(&id) {
        tracing::debug!(connection_id = %id, node = %node, "Node unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::testing::{peer_addr, MockPeer, MockSocket};
    use axum::body::Bytes;
    use axum::extract::ws::Message;

    const HANDSHAKE: Duration = Duration::from_secs(10);
    const IDLE: Duration = Duration::from_secs(60);

    struct Harness {
        connections: ConnectionRegistry,
        nodes: NodeRegistry,
        session: tokio::task::JoinHandle<()>,
    }

    fn start() -> (Harness, MockPeer) {
        let connections = ConnectionRegistry::new(IDLE);
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(connections.clone(), nodes.clone(), HANDSHAKE);
        let (socket, peer) = MockSocket::pair();
        let session = tokio::spawn(async move { manager.serve(socket, peer_addr()).await });
        (
            Harness {
                connections,
                nodes,
                session,
            },
            peer,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_registers_hex_address() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[0xaa, 0xbb, 0xcc])));
        settle().await;

        let map = harness.nodes.address_map();
        assert_eq!(map.get("aabbcc").map(String::as_str), Some("203.0.113.7"));
        assert_eq!(harness.connections.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_handshake_closes_without_node() {
        let (harness, peer) = start();
        tokio::time::sleep(HANDSHAKE + Duration::from_secs(1)).await;

        assert!(harness.session.is_finished());
        assert!(harness.connections.is_empty());
        assert!(harness.nodes.is_empty());
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_keeps_node_registered() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(40)).await;
            peer.send(Message::Ping(Bytes::from_static(b"p")));
            settle().await;
            assert_eq!(peer.try_recv(), Some(Message::Pong(Bytes::from_static(b"p"))));
        }

        assert_eq!(harness.nodes.len(), 1);
        assert!(!harness.session.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn close_frame_unregisters_node() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;
        assert_eq!(harness.nodes.len(), 1);

        peer.send(Message::Close(None));
        settle().await;

        assert!(harness.nodes.is_empty());
        assert!(harness.connections.is_empty());
        assert!(harness.session.is_finished());
        // Our side of the closing handshake still goes out.
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_eviction_unregisters_node() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;
        assert_eq!(harness.nodes.len(), 1);

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;

        assert!(harness.nodes.is_empty());
        assert!(harness.connections.is_empty());
        assert!(peer.is_closed());
        assert!(harness.session.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn data_frame_ends_session() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;

        peer.send(Message::Text("unexpected".into()));
        settle().await;

        assert!(harness.nodes.is_empty());
        assert!(harness.session.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_unregisters_node() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;

        peer.fail();
        settle().await;

        assert!(harness.nodes.is_empty());
        assert!(harness.connections.is_empty());
        assert!(!peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_session_still_cleans_up() {
        let (harness, mut peer) = start();
        peer.send(Message::Binary(Bytes::from_static(&[1])));
        settle().await;

        harness.session.abort();
        settle().await;

        assert!(harness.nodes.is_empty());
        assert!(harness.connections.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn register_after_close_leaves_no_node() {
        let connections = ConnectionRegistry::new(IDLE);
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(connections.clone(), nodes.clone(), HANDSHAKE);
        let (socket, _peer) = MockSocket::pair();
        let id = connections.open(socket, peer_addr(), Some(manager.disconnect_hook()));
        let remote_addr = connections.remote_addr(id).unwrap();

        // Closed after the handshake frame was read, before the node exists.
        connections.close(id).await.unwrap();

        assert!(manager.register(id, &[0xaa], remote_addr).is_none());
        assert!(nodes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_handshake_ends_handle_without_node() {
        let connections = ConnectionRegistry::new(IDLE);
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(connections.clone(), nodes.clone(), HANDSHAKE);
        let (socket, mut peer) = MockSocket::pair();
        let id = connections.open(socket, peer_addr(), Some(manager.disconnect_hook()));

        let handler = manager.clone();
        let session = tokio::spawn(async move { handler.handle(id).await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        connections.close(id).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(1), session)
            .await
            .expect("handle should return once the connection is closed")
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::NotFound(_))));

        // A late handshake frame changes nothing.
        peer.send(Message::Binary(Bytes::from_static(&[0xaa])));
        settle().await;
        assert!(nodes.is_empty());
        assert!(connections.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_register_removes_node() {
        let connections = ConnectionRegistry::new(IDLE);
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(connections.clone(), nodes.clone(), HANDSHAKE);
        let (socket, _peer) = MockSocket::pair();
        let id = connections.open(socket, peer_addr(), Some(manager.disconnect_hook()));
        let remote_addr = connections.remote_addr(id).unwrap();

        let node = manager.register(id, &[0xaa], remote_addr).unwrap();
        assert_eq!(node.ip_address, "203.0.113.7");
        assert_eq!(nodes.len(), 1);

        connections.close(id).await.unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn on_disconnect_is_idempotent() {
        let nodes = NodeRegistry::new();
        let manager = NodeManager::new(ConnectionRegistry::new(IDLE), nodes.clone(), HANDSHAKE);
        let id = ConnectionId::new();
        nodes.add(id, "aa".into(), "10.0.0.1".into());

        manager.on_disconnect(id);
        manager.on_disconnect(id);
        (manager.disconnect_hook())(id);
        assert!(nodes.is_empty());
    }
}
