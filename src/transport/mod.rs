//! Node to node transport.

mod local;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cluster::NodeId;
use crate::error::TransportError;

pub use local::LocalTransport;

/// The actions a node may be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Execute a forwarded shard request as the primary.
    Primary,
    /// Replay a shard request, already executed by the primary, on a replica.
    Replica,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "shard/primary",
            Self::Replica => "shard/replica",
        }
    }
}

/// A request/response RPC primitive between nodes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a frame to the given node, returning its response frame.
    async fn send(&self, node_id: &NodeId, action: Action, frame: Bytes) -> Result<Bytes, TransportError>;
}

/// The receiving side of the transport, implemented by each node.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a frame received from another node, returning the response frame.
    async fn handle(&self, action: Action, frame: Bytes) -> Bytes;
}
