//! Cluster state.
//!
//! The cluster state is an immutable snapshot of the nodes, routing table and blocks of the
//! cluster. New snapshots are published through a `watch` channel, which is also how the write
//! consistency gate learns that it should re-check the shards of a waiting request.

mod block;
mod routing;
mod shard_state;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

pub use block::{check_block, ClusterBlock, ClusterBlockLevel, ClusterBlocks, INDEX_CLOSED, INDEX_READ_ONLY, NO_MASTER, STATE_NOT_RECOVERED};
pub use routing::{
    shard_for_routing, shards, GroupShardsIterator, IndexRoutingTable, IndexShardRoutingTable, OperationRouting, RoutingTable, ShardId, ShardRole,
    ShardRouting, ShardState, ShardsIterator,
};
pub use shard_state::{LocalShardStateAction, ShardFailure, ShardFailureListener, ShardStateReporter};

/// The ID of a node in the cluster.
pub type NodeId = String;

/// A `watch::Sender` of cluster state snapshots.
pub type ClusterStateTx = watch::Sender<Arc<ClusterState>>;
/// A `watch::Receiver` of cluster state snapshots.
pub type ClusterStateRx = watch::Receiver<Arc<ClusterState>>;

/// An immutable snapshot of the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterState {
    version: u64,
    nodes: BTreeSet<NodeId>,
    routing_table: RoutingTable,
    blocks: ClusterBlocks,
}

impl ClusterState {
    /// Start building a new cluster state.
    pub fn builder() -> ClusterStateBuilder {
        ClusterStateBuilder::default()
    }

    /// A builder seeded with the contents of this snapshot.
    pub fn to_builder(&self) -> ClusterStateBuilder {
        ClusterStateBuilder { state: self.clone() }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &BTreeSet<NodeId> {
        &self.nodes
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn blocks(&self) -> &ClusterBlocks {
        &self.blocks
    }
}

/// A builder of cluster state snapshots.
#[derive(Clone, Debug, Default)]
pub struct ClusterStateBuilder {
    state: ClusterState,
}

impl ClusterStateBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.state.version = version;
        self
    }

    pub fn node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.state.nodes.insert(node_id.into());
        self
    }

    pub fn remove_node(mut self, node_id: &str) -> Self {
        self.state.nodes.remove(node_id);
        self
    }

    /// Add the routing table of an index, replacing any previous one.
    pub fn index(mut self, index: IndexRoutingTable) -> Self {
        self.state.routing_table = std::mem::take(&mut self.state.routing_table).with_index(index);
        self
    }

    pub fn global_block(mut self, block: ClusterBlock) -> Self {
        self.state.blocks.add_global(block);
        self
    }

    pub fn index_block(mut self, index: &str, block: ClusterBlock) -> Self {
        self.state.blocks.add_index(index, block);
        self
    }

    pub fn remove_global_block(mut self, id: u32) -> Self {
        self.state.blocks.remove_global(id);
        self
    }

    pub fn remove_index_block(mut self, index: &str, id: u32) -> Self {
        self.state.blocks.remove_index(index, id);
        self
    }

    /// Mark the copy of the given shard on the given node as unassigned.
    pub fn fail_shard(mut self, shard_id: &ShardId, node_id: &str) -> Self {
        self.state.routing_table.fail_shard(shard_id, node_id);
        self
    }

    pub fn build(self) -> ClusterState {
        self.state
    }
}

/// The local source of cluster state snapshots.
///
/// Readers take cheap snapshots via `state`, and may subscribe to be woken whenever a new
/// snapshot is published.
#[derive(Clone)]
pub struct ClusterService {
    tx: Arc<ClusterStateTx>,
    rx: ClusterStateRx,
}

impl ClusterService {
    /// Create a new instance seeded with the given state.
    pub fn new(state: ClusterState) -> Self {
        let (tx, rx) = watch::channel(Arc::new(state));
        Self { tx: Arc::new(tx), rx }
    }

    /// The current cluster state snapshot.
    pub fn state(&self) -> Arc<ClusterState> {
        self.rx.borrow().clone()
    }

    /// Subscribe to new cluster state snapshots.
    ///
    /// The returned receiver considers the current snapshot as already seen.
    pub fn subscribe(&self) -> ClusterStateRx {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        rx
    }

    /// Publish a new cluster state, replacing the current one as is.
    pub fn publish(&self, state: ClusterState) {
        self.tx.send_replace(Arc::new(state));
    }

    /// Publish a new cluster state derived from the current one, bumping its version.
    pub fn update<F>(&self, f: F) -> Arc<ClusterState>
    where
        F: FnOnce(ClusterStateBuilder) -> ClusterStateBuilder,
    {
        let mut next = None;
        self.tx.send_modify(|state| {
            let version = state.version + 1;
            let new = Arc::new(f(state.to_builder()).version(version).build());
            *state = new.clone();
            next = Some(new);
        });
        next.unwrap_or_else(|| self.state())
    }
}
