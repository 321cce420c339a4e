use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::cluster::NodeId;
use crate::error::TransportError;
use crate::transport::{Action, RequestHandler, Transport};

/// A registered node of the local transport.
#[derive(Clone)]
struct LocalNode {
    handler: Arc<dyn RequestHandler>,
    connected: bool,
}

/// An in-process transport connecting the nodes registered with it.
///
/// Every frame is delivered to the receiving node in a newly allocated receive buffer, which the
/// receiver is free to reference until it responds, and every request is handled on a task of its
/// own, as a network transport would.
#[derive(Clone, Default)]
pub struct LocalTransport {
    nodes: Arc<ArcSwap<HashMap<NodeId, LocalNode>>>,
}

impl LocalTransport {
    /// Create a new instance with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler of a node, replacing any previous registration.
    pub fn register(&self, node_id: impl Into<NodeId>, handler: Arc<dyn RequestHandler>) {
        let node_id = node_id.into();
        tracing::debug!(%node_id, "registering node with local transport");
        let orig = self.nodes.load_full();
        let mut updated = orig.as_ref().clone();
        updated.insert(node_id, LocalNode { handler, connected: true });
        self.nodes.store(Arc::new(updated));
    }

    /// Disconnect a node; sending to it fails until it is reconnected.
    pub fn disconnect(&self, node_id: &str) {
        self.set_connected(node_id, false);
    }

    /// Reconnect a previously disconnected node.
    pub fn reconnect(&self, node_id: &str) {
        self.set_connected(node_id, true);
    }

    fn set_connected(&self, node_id: &str, connected: bool) {
        let orig = self.nodes.load_full();
        let mut updated = orig.as_ref().clone();
        if let Some(node) = updated.get_mut(node_id) {
            tracing::debug!(%node_id, connected, "updating local transport node connection");
            node.connected = connected;
        }
        self.nodes.store(Arc::new(updated));
    }
}

#[async_trait]
impl Transport for LocalTransport {
    #[tracing::instrument(level = "trace", skip(self, frame), fields(action = action.name(), len = frame.len()))]
    async fn send(&self, node_id: &NodeId, action: Action, frame: Bytes) -> Result<Bytes, TransportError> {
        let node = match self.nodes.load().get(node_id) {
            Some(node) => node.clone(),
            None => return Err(TransportError::UnknownNode(node_id.clone())),
        };
        if !node.connected {
            return Err(TransportError::NodeDisconnected(node_id.clone()));
        }

        // Hand the receiver a buffer of its own, as if read off a socket.
        let mut recv_buf = BytesMut::with_capacity(frame.len());
        recv_buf.extend_from_slice(&frame);
        let recv_buf = recv_buf.freeze();

        let handler = node.handler.clone();
        let res = tokio::spawn(async move { handler.handle(action, recv_buf).await }).await;
        match res {
            Ok(response) => Ok(Bytes::copy_from_slice(&response)),
            Err(err) => Err(TransportError::Remote {
                node_id: node_id.clone(),
                message: format!("request handler task failed: {}", err),
            }),
        }
    }
}
