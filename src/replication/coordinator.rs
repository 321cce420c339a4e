use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tokio::time::Instant;

use crate::cluster::{self, ClusterService, NodeId, ShardId, ShardStateReporter, ShardsIterator};
use crate::codec;
use crate::config::Config;
use crate::consistency::{self, Backoff};
use crate::engine::IndicesService;
use crate::error::{ConsistencyError, PrimaryExecutionError, ReplicaExecutionError, ReplicaFailure, ReplicationResult, RoutingError};
use crate::models::{ReplicaStats, ReplicationRequest, ReplicationResponse, ReplicationType};
use crate::replication::{
    shard_operation_on_primary, shard_operation_on_replica, WorkerPool, METRIC_BLOCKED_REQUESTS, METRIC_BULK_ITEM_FAILURES, METRIC_CONSISTENCY_TIMEOUTS,
    METRIC_PRIMARY_FAILURES, METRIC_PRIMARY_OPERATIONS, METRIC_REFRESH_FAILURES, METRIC_REPLICA_FAILURES,
};
use crate::transport::{Action, RequestHandler, Transport};

/// The phases a replicated write moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationPhase {
    Received,
    BlockChecked,
    Routed,
    ConsistencyOk,
    PrimaryExecuting,
    Replicating,
    Done,
    Failed,
}

impl fmt::Display for ReplicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Received => "RECEIVED",
            Self::BlockChecked => "BLOCK_CHECKED",
            Self::Routed => "ROUTED",
            Self::ConsistencyOk => "CONSISTENCY_OK",
            Self::PrimaryExecuting => "PRIMARY_EXECUTING",
            Self::Replicating => "REPLICATING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// The coordinator of replicated writes on a node.
///
/// The coordinator checks a request against the cluster state, executes it on the primary copy
/// of its shard (forwarding it to the primary's node when that is another node), and then
/// replicates the primary's accepted form of the request to every assigned replica copy.
#[derive(Clone)]
pub struct ReplicationCoordinator {
    /// Runtime config.
    config: Arc<Config>,
    /// The source of cluster state snapshots.
    cluster: ClusterService,
    /// The shard copies hosted by this node.
    indices: IndicesService,
    /// The transport used to reach other nodes.
    transport: Arc<dyn Transport>,
    /// The collaborator told about failed replica copies.
    reporter: Arc<dyn ShardStateReporter>,
    /// The blocking workers on which shard operations execute.
    pool: WorkerPool,
}

impl ReplicationCoordinator {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, cluster: ClusterService, indices: IndicesService, transport: Arc<dyn Transport>, reporter: Arc<dyn ShardStateReporter>) -> Self {
        metrics::register_counter!(METRIC_PRIMARY_OPERATIONS, metrics::Unit::Count, "shard operations executed on a local primary");
        metrics::register_counter!(METRIC_PRIMARY_FAILURES, metrics::Unit::Count, "shard operations which failed on a local primary");
        metrics::register_counter!(METRIC_REPLICA_FAILURES, metrics::Unit::Count, "replica failures reported to the shard state collaborator");
        metrics::register_counter!(METRIC_BLOCKED_REQUESTS, metrics::Unit::Count, "requests rejected by a cluster block");
        metrics::register_counter!(METRIC_CONSISTENCY_TIMEOUTS, metrics::Unit::Count, "requests which timed out waiting for write consistency");
        metrics::register_counter!(METRIC_BULK_ITEM_FAILURES, metrics::Unit::Count, "bulk items which failed on a local primary");
        metrics::register_counter!(METRIC_REFRESH_FAILURES, metrics::Unit::Count, "shard refreshes which failed after a write");
        let pool = WorkerPool::new(config.worker_pool_size);
        Self {
            config,
            cluster,
            indices,
            transport,
            reporter,
            pool,
        }
    }

    /// The ID of this node.
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Execute a replicated write, returning once the primary's outcome is known.
    #[tracing::instrument(level = "debug", skip(self, request), fields(
        request_id = %request.request_id(),
        shard = %request.shard(),
        op = request.operation().name(),
        node = %self.config.node_id,
    ))]
    pub async fn execute(&self, request: ReplicationRequest) -> ReplicationResult<ReplicationResponse> {
        self.run(request, false).await
    }

    /// Handle a request forwarded to this node as the primary's node.
    #[tracing::instrument(level = "debug", skip(self, frame), fields(len = frame.len(), node = %self.config.node_id))]
    pub async fn handle_primary_frame(&self, frame: Bytes) -> Bytes {
        let res = match codec::decode_request(frame) {
            Ok(request) => {
                tracing::debug!(request_id = %request.request_id(), shard = %request.shard(), "received forwarded primary request");
                self.run(request, true).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejecting malformed primary request");
                Err(err.into())
            }
        };
        codec::encode_response(&res)
    }

    /// Handle a request sent to this node to be replayed on a replica.
    #[tracing::instrument(level = "debug", skip(self, frame), fields(len = frame.len(), node = %self.config.node_id))]
    pub async fn handle_replica_frame(&self, frame: Bytes) -> Bytes {
        let res = match codec::decode_request(frame) {
            Ok(request) => self.perform_on_replica(request).await,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting malformed replica request");
                Err(ReplicaFailure::Remote(format!("invalid replica request: {}", err)))
            }
        };
        codec::encode_replica_ack(&res)
    }

    async fn run(&self, request: ReplicationRequest, forwarded: bool) -> ReplicationResult<ReplicationResponse> {
        tracing::debug!(phase = %ReplicationPhase::Received, forwarded);
        let res = self.run_phases(request, forwarded).await;
        match &res {
            Ok(response) => tracing::debug!(phase = %ReplicationPhase::Done, replicas = ?response.replicas),
            Err(err) => tracing::debug!(phase = %ReplicationPhase::Failed, error = %err),
        }
        res
    }

    async fn run_phases(&self, request: ReplicationRequest, forwarded: bool) -> ReplicationResult<ReplicationResponse> {
        let shards = self.resolve(&request).await?;
        let primary_node = shards
            .primary()
            .and_then(|primary| primary.node_id.clone())
            .ok_or_else(|| RoutingError::ShardNotFound { shard_id: request.shard() })?;

        if primary_node != self.config.node_id {
            if forwarded {
                return Err(RoutingError::PrimaryNotLocal {
                    shard_id: request.shard(),
                    node_id: self.config.node_id.clone(),
                }
                .into());
            }
            return self.forward_to_primary(&primary_node, request).await;
        }
        self.perform_on_primary(request, shards).await
    }

    /// Resolve the shard copies of the request, waiting for write consistency.
    ///
    /// Every attempt works from the latest cluster state, and checks blocks and routing again.
    async fn resolve(&self, request: &ReplicationRequest) -> ReplicationResult<ShardsIterator> {
        let level = request.effective_consistency(self.config.default_consistency);
        let started = Instant::now();
        let deadline = consistency::deadline_after(started, request.timeout().unwrap_or_else(|| self.config.default_timeout()));
        let mut changes = self.cluster.subscribe();
        let mut backoff = Backoff::new(self.config.consistency_poll_interval(), self.config.consistency_max_backoff());

        loop {
            let state = self.cluster.state();
            if let Err(err) = cluster::check_block(request, &state) {
                metrics::increment_counter!(METRIC_BLOCKED_REQUESTS);
                return Err(err.into());
            }
            tracing::trace!(phase = %ReplicationPhase::BlockChecked, version = state.version());

            let shards = cluster::shards(&state, request)?;
            tracing::trace!(phase = %ReplicationPhase::Routed, copies = shards.size());

            match consistency::check(&shards, level) {
                Ok(()) => {
                    tracing::debug!(phase = %ReplicationPhase::ConsistencyOk, %level, active = shards.size_active(), copies = shards.size());
                    return Ok(shards);
                }
                Err(unmet) if Instant::now() >= deadline => {
                    metrics::increment_counter!(METRIC_CONSISTENCY_TIMEOUTS);
                    return Err(ConsistencyError::Timeout {
                        shard_id: shards.shard_id().clone(),
                        level,
                        required: unmet.required as u32,
                        active: unmet.active as u32,
                        primary_active: unmet.primary_active,
                        waited: started.elapsed(),
                    }
                    .into());
                }
                Err(unmet) => {
                    tracing::debug!(
                        %level,
                        required = unmet.required,
                        active = unmet.active,
                        primary_active = unmet.primary_active,
                        "write consistency not met, waiting for cluster state change"
                    );
                    consistency::wait_for_change(&mut changes, &mut backoff, deadline).await;
                }
            }
        }
    }

    async fn forward_to_primary(&self, node_id: &NodeId, request: ReplicationRequest) -> ReplicationResult<ReplicationResponse> {
        tracing::debug!(phase = %ReplicationPhase::PrimaryExecuting, primary = %node_id, "forwarding request to primary node");
        let frame = codec::encode_request(&request);
        let response = self.transport.send(node_id, Action::Primary, frame).await?;
        codec::decode_response(response, node_id)
    }

    async fn perform_on_primary(&self, request: ReplicationRequest, shards: ShardsIterator) -> ReplicationResult<ReplicationResponse> {
        let shard_id = shards.shard_id().clone();
        let engine = self.indices.shard_safe(&shard_id).map_err(|source| PrimaryExecutionError {
            shard_id: shard_id.clone(),
            source,
        })?;
        let replication_type = request.replication_type().unwrap_or(self.config.default_replication);

        tracing::debug!(phase = %ReplicationPhase::PrimaryExecuting);
        metrics::increment_counter!(METRIC_PRIMARY_OPERATIONS);
        let outcome = match self.pool.fork(request, move |request| shard_operation_on_primary(engine.as_ref(), request)).await? {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "shard operation failed on primary");
                metrics::increment_counter!(METRIC_PRIMARY_FAILURES);
                return Err(err.into());
            }
        };

        tracing::debug!(phase = %ReplicationPhase::Replicating, ?replication_type);
        let shards = self.latest_shards(&outcome.request).unwrap_or(shards);
        let replicas = self.replicate(&shard_id, &outcome.request, &shards, replication_type).await;
        Ok(ReplicationResponse {
            shard_id,
            result: outcome.result,
            replicas,
        })
    }

    /// The copies of the request's shard on the latest cluster state.
    ///
    /// Replicas which started recovering while the primary executed must receive the operation.
    fn latest_shards(&self, request: &ReplicationRequest) -> Option<ShardsIterator> {
        cluster::shards(&self.cluster.state(), request).ok()
    }

    /// Send the primary's accepted form of a request to every assigned replica copy.
    async fn replicate(&self, shard_id: &ShardId, request: &ReplicationRequest, shards: &ShardsIterator, replication_type: ReplicationType) -> ReplicaStats {
        let targets: Vec<NodeId> = shards
            .replicas()
            .filter(|replica| replica.assigned())
            .filter_map(|replica| replica.node_id.clone())
            .collect();
        if targets.is_empty() {
            return ReplicaStats::default();
        }

        let frame = codec::encode_request(request);
        let total = targets.len() as u32;
        let dispatches: Vec<_> = targets
            .into_iter()
            .map(|node_id| {
                let (this, shard_id, frame) = (self.clone(), shard_id.clone(), frame.clone());
                let local = if node_id == self.config.node_id { Some(request.clone()) } else { None };
                async move { this.replicate_to(shard_id, node_id, frame, local).await }
            })
            .collect();

        match replication_type {
            ReplicationType::Sync => {
                let failed = join_all(dispatches).await.into_iter().filter(|ok| !ok).count() as u32;
                ReplicaStats::awaited(total, failed)
            }
            ReplicationType::Async => {
                tokio::spawn(async move {
                    join_all(dispatches).await;
                });
                ReplicaStats::pending(total)
            }
        }
    }

    /// Replicate to one replica copy, returning `true` if it applied the operation.
    async fn replicate_to(&self, shard_id: ShardId, node_id: NodeId, frame: Bytes, local: Option<ReplicationRequest>) -> bool {
        let res = match local {
            Some(request) => self.perform_on_replica(request).await,
            None => match self.transport.send(&node_id, Action::Replica, frame).await {
                Ok(ack) => codec::decode_replica_ack(ack, &node_id),
                Err(err) => Err(ReplicaFailure::Transport(err)),
            },
        };
        match res {
            Ok(()) => true,
            Err(kind) => {
                self.handle_replica_failure(ReplicaExecutionError { shard_id, node_id, kind });
                false
            }
        }
    }

    fn handle_replica_failure(&self, err: ReplicaExecutionError) {
        if err.is_ignorable() {
            tracing::debug!(error = %err, "ignoring replica failure");
            return;
        }
        tracing::warn!(shard = %err.shard_id, replica = %err.node_id, error = %err, "replica failed to apply operation, reporting shard failure");
        metrics::increment_counter!(METRIC_REPLICA_FAILURES);
        self.reporter.report_failure(&err.shard_id, &err.node_id, &err.to_string());
    }

    async fn perform_on_replica(&self, request: ReplicationRequest) -> Result<(), ReplicaFailure> {
        let engine = self.indices.shard_safe(&request.shard()).map_err(ReplicaFailure::Engine)?;
        self.pool
            .fork(request, move |request| shard_operation_on_replica(engine.as_ref(), &request))
            .await
            .map_err(|err| ReplicaFailure::Remote(err.to_string()))?
            .map_err(ReplicaFailure::Engine)
    }
}

#[async_trait]
impl RequestHandler for ReplicationCoordinator {
    async fn handle(&self, action: Action, frame: Bytes) -> Bytes {
        match action {
            Action::Primary => self.handle_primary_frame(frame).await,
            Action::Replica => self.handle_replica_frame(frame).await,
        }
    }
}
