//! Shard failure reporting.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cluster::{ClusterService, NodeId, ShardId};

const METRIC_SHARD_FAILURES_APPLIED: &str = "hadron_shard_failures_applied";

/// A collaborator which is told about replica copies which failed to apply an operation.
///
/// Implementations must not block, as they are called from the replication path.
pub trait ShardStateReporter: Send + Sync + 'static {
    /// Report that the copy of the given shard on the given node failed.
    fn report_failure(&self, shard_id: &ShardId, node_id: &NodeId, reason: &str);
}

/// A reported shard failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub reason: String,
}

/// A reporter which queues shard failures for the local `ShardFailureListener`.
#[derive(Clone)]
pub struct LocalShardStateAction {
    tx: mpsc::UnboundedSender<ShardFailure>,
}

impl ShardStateReporter for LocalShardStateAction {
    fn report_failure(&self, shard_id: &ShardId, node_id: &NodeId, reason: &str) {
        let failure = ShardFailure {
            shard_id: shard_id.clone(),
            node_id: node_id.clone(),
            reason: reason.to_string(),
        };
        if self.tx.send(failure).is_err() {
            tracing::warn!(%shard_id, %node_id, "shard failure listener is gone, dropping shard failure");
        }
    }
}

/// A task which applies reported shard failures to the cluster state.
///
/// A failed copy is marked unassigned, which removes it from future replication fan out and from
/// the active count of the write consistency gate.
pub struct ShardFailureListener {
    cluster: ClusterService,
    failures: mpsc::UnboundedReceiver<ShardFailure>,
    shutdown: broadcast::Receiver<()>,
}

impl ShardFailureListener {
    /// Create a new instance, along with the reporter which feeds it.
    pub fn new(cluster: ClusterService, shutdown: broadcast::Receiver<()>) -> (Self, LocalShardStateAction) {
        metrics::register_counter!(METRIC_SHARD_FAILURES_APPLIED, metrics::Unit::Count, "shard failures applied to the cluster state");
        let (tx, failures) = mpsc::unbounded_channel();
        (Self { cluster, failures, shutdown }, LocalShardStateAction { tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!("shard failure listener started");
        loop {
            tokio::select! {
                Some(failure) = self.failures.recv() => self.handle_failure(failure),
                _ = self.shutdown.recv() => break,
                else => break,
            }
        }
        tracing::debug!("shard failure listener shutdown");
    }

    #[tracing::instrument(level = "debug", skip(self, failure), fields(shard_id = %failure.shard_id, node_id = %failure.node_id))]
    fn handle_failure(&self, failure: ShardFailure) {
        tracing::warn!(reason = %failure.reason, "marking failed shard copy as unassigned");
        let state = self.cluster.update(|builder| builder.fail_shard(&failure.shard_id, &failure.node_id));
        metrics::increment_counter!(METRIC_SHARD_FAILURES_APPLIED);
        tracing::debug!(version = state.version(), "published cluster state with failed shard copy");
    }
}
