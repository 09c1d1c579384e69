//! In-memory registry of announced nodes.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connections::ConnectionId;
use crate::observability::metrics;

/// A registered peer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Id of the connection that announced this node.
    pub id: ConnectionId,
    /// Lowercase hex of the handshake payload.
    pub public_address: String,
    /// IP the connection came from.
    pub ip_address: String,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} ({})", self.public_address, self.ip_address)
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node for connection {0} not found")]
    NotFound(ConnectionId),
}

/// Thread-safe node store keyed by connection id. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    inner: Arc<DashMap<ConnectionId, Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node, replacing any previous entry for `id`.
    pub fn add(&self, id: ConnectionId, public_address: String, ip_address: String) -> Node {
        let node = Node {
            id,
            public_address,
            ip_address,
        };
        self.inner.insert(id, node.clone());
        metrics::record_nodes(self.inner.len());
        node
    }

    /// Remove the node for `id`, if any.
    pub fn remove(&self, id: &ConnectionId) -> Option<Node> {
        let removed = self.inner.remove(id).map(|(_, node)| node);
        if removed.is_some() {
            metrics::record_nodes(self.inner.len());
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Result<Node, NodeError> {
        self.inner
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(NodeError::NotFound(*id))
    }

    /// Snapshot of all nodes, in no particular order.
    pub fn list(&self) -> Vec<Node> {
        self.inner.iter().map(|r| r.value().clone()).collect()
    }

    /// Public address → IP address view. Duplicate public addresses keep
    /// whichever node is visited last.
    pub fn address_map(&self) -> HashMap<String, String> {
        self.inner
            .iter()
            .map(|r| (r.public_address.clone(), r.ip_address.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
