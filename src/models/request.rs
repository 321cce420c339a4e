use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::cluster::{ClusterState, OperationRouting, ShardId};
use crate::consistency::WriteConsistencyLevel;
use crate::error::RoutingError;
use crate::models::bulk::{BulkShardRequest, ItemOperation};
use crate::models::proto::{DeleteRequest, IndexRequest};

/// The kind of a shard operation, as encoded on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Index,
    Create,
    Delete,
    Bulk,
}

impl OperationKind {
    /// The wire ID of this kind.
    pub fn id(&self) -> u8 {
        match self {
            Self::Index => 1,
            Self::Create => 2,
            Self::Delete => 3,
            Self::Bulk => 4,
        }
    }

    /// Parse a kind from its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Index),
            2 => Some(Self::Create),
            3 => Some(Self::Delete),
            4 => Some(Self::Bulk),
            _ => None,
        }
    }
}

/// How the coordinator waits on replicas before responding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicationType {
    /// Respond once every replica has reported its outcome.
    Sync,
    /// Respond once the primary is done and the replica dispatches are issued.
    Async,
}

impl ReplicationType {
    /// The wire ID of this type.
    pub fn id(&self) -> u8 {
        match self {
            Self::Sync => 1,
            Self::Async => 2,
        }
    }

    /// Parse a type from its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Sync),
            2 => Some(Self::Async),
            _ => None,
        }
    }
}

/// The operation carried by a replication request.
#[derive(Clone, Debug, PartialEq)]
pub enum ShardOperation {
    Index(IndexRequest),
    Create(IndexRequest),
    Delete(DeleteRequest),
    Bulk(BulkShardRequest),
}

impl ShardOperation {
    /// A short name of the operation, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Create(_) => "create",
            Self::Delete(_) => "delete",
            Self::Bulk(_) => "bulk",
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Index(_) => OperationKind::Index,
            Self::Create(_) => OperationKind::Create,
            Self::Delete(_) => OperationKind::Delete,
            Self::Bulk(_) => OperationKind::Bulk,
        }
    }

    /// Check if any payload of this operation holds a buffer which may be shared.
    pub fn references_buffers(&self) -> bool {
        match self {
            Self::Index(req) | Self::Create(req) => !req.source.is_empty(),
            Self::Delete(_) => false,
            Self::Bulk(bulk) => bulk.items().iter().any(|item| item.operation().references_buffers()),
        }
    }

    /// Copy every shared payload buffer into a new allocation owned by this operation.
    fn detach_buffers(&mut self) {
        match self {
            Self::Index(req) | Self::Create(req) => req.source = bytes::Bytes::copy_from_slice(&req.source),
            Self::Delete(_) => (),
            Self::Bulk(bulk) => bulk.items_mut().iter_mut().for_each(|item| item.operation_mut().detach_buffers()),
        }
    }
}

impl From<ItemOperation> for ShardOperation {
    fn from(operation: ItemOperation) -> Self {
        match operation {
            ItemOperation::Index(req) => Self::Index(req),
            ItemOperation::Create(req) => Self::Create(req),
            ItemOperation::Delete(req) => Self::Delete(req),
        }
    }
}

/// A write operation addressed to one shard, along with its replication options.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicationRequest {
    pub(crate) request_id: Uuid,
    pub(crate) index: String,
    pub(crate) shard_id: u32,
    pub(crate) consistency: Option<WriteConsistencyLevel>,
    pub(crate) check_write_consistency: bool,
    pub(crate) replication_type: Option<ReplicationType>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) refresh: bool,
    /// The operation may reference a buffer owned by the network layer.
    pub(crate) unsafe_buffers: bool,
    pub(crate) operation: ShardOperation,
}

impl ReplicationRequest {
    /// Create a new request for the given shard of the given index.
    pub fn new(index: impl Into<String>, shard_id: u32, operation: ShardOperation) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            index: index.into(),
            shard_id,
            consistency: None,
            check_write_consistency: true,
            replication_type: None,
            timeout: None,
            refresh: false,
            unsafe_buffers: false,
            operation,
        }
    }

    /// Create a new bulk request for the given shard of the given index.
    pub fn bulk(index: impl Into<String>, shard_id: u32, bulk: BulkShardRequest) -> Self {
        Self::new(index, shard_id, ShardOperation::Bulk(bulk))
    }

    /// Create a new request for a single document, routed to its shard on the given state.
    pub fn for_document(state: &ClusterState, index: impl Into<String>, operation: ItemOperation) -> Result<Self, RoutingError> {
        let index = index.into();
        let shard_id = OperationRouting::shard_id(state, &index, operation.id(), operation.routing_value())?;
        Ok(Self::new(index, shard_id, operation.into()))
    }

    pub fn with_consistency(mut self, level: WriteConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    pub fn with_replication_type(mut self, replication_type: ReplicationType) -> Self {
        self.replication_type = Some(replication_type);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Disable the write consistency check, which is then treated as level `ONE`.
    pub fn without_write_consistency_check(mut self) -> Self {
        self.check_write_consistency = false;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// The full ID of the target shard.
    pub fn shard(&self) -> ShardId {
        ShardId::new(self.index.clone(), self.shard_id)
    }

    pub fn consistency(&self) -> Option<WriteConsistencyLevel> {
        self.consistency
    }

    pub fn check_write_consistency(&self) -> bool {
        self.check_write_consistency
    }

    /// The consistency level to enforce, given the node's default.
    pub fn effective_consistency(&self, default: WriteConsistencyLevel) -> WriteConsistencyLevel {
        if !self.check_write_consistency {
            return WriteConsistencyLevel::One;
        }
        self.consistency.unwrap_or(default)
    }

    pub fn replication_type(&self) -> Option<ReplicationType> {
        self.replication_type
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn refresh(&self) -> bool {
        self.refresh
    }

    /// Check if this request still references buffers it does not own.
    pub fn has_unsafe_buffers(&self) -> bool {
        self.unsafe_buffers
    }

    pub fn operation(&self) -> &ShardOperation {
        &self.operation
    }

    /// Prepare this request to be moved to another thread.
    ///
    /// Any payload referencing a buffer owned by the network layer is copied into an allocation
    /// owned by the returned request. Calling this on a prepared request does nothing.
    pub fn prepare_for_dispatch(mut self) -> Self {
        if self.unsafe_buffers {
            self.operation.detach_buffers();
            self.unsafe_buffers = false;
        }
        self
    }
}
