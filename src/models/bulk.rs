use std::collections::BTreeMap;

use crate::cluster::{ClusterState, OperationRouting};
use crate::error::RoutingError;
use crate::models::proto::{DeleteRequest, IndexRequest, OpType};

/// The execution status of a bulk item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// The item has not been executed on the primary.
    Pending,
    /// The item was applied on the primary, and should be replayed on replicas.
    Applied,
    /// The item failed on the primary, and must be skipped by replicas.
    Failed,
}

impl ItemStatus {
    /// The wire ID of this status.
    pub fn id(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Applied => 1,
            Self::Failed => 2,
        }
    }

    /// Parse a status from its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Pending),
            1 => Some(Self::Applied),
            2 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A single document operation.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemOperation {
    Index(IndexRequest),
    Create(IndexRequest),
    Delete(DeleteRequest),
}

impl ItemOperation {
    pub fn op_type(&self) -> OpType {
        match self {
            Self::Index(_) => OpType::Index,
            Self::Create(_) => OpType::Create,
            Self::Delete(_) => OpType::Delete,
        }
    }

    pub fn doc_type(&self) -> &str {
        match self {
            Self::Index(req) | Self::Create(req) => &req.doc_type,
            Self::Delete(req) => &req.doc_type,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Index(req) | Self::Create(req) => &req.id,
            Self::Delete(req) => &req.id,
        }
    }

    /// The value used to compute the document's shard.
    pub fn routing_value(&self) -> Option<&str> {
        match self {
            Self::Index(req) | Self::Create(req) => req.routing.as_deref(),
            Self::Delete(req) => req.routing.as_deref(),
        }
    }

    /// The version of the operation, 0 for none.
    pub fn version(&self) -> u64 {
        match self {
            Self::Index(req) | Self::Create(req) => req.version,
            Self::Delete(req) => req.version,
        }
    }

    /// The document source, for operations which carry one.
    pub fn source(&self) -> Option<&bytes::Bytes> {
        match self {
            Self::Index(req) | Self::Create(req) => Some(&req.source),
            Self::Delete(_) => None,
        }
    }

    pub(crate) fn references_buffers(&self) -> bool {
        self.source().map(|source| !source.is_empty()).unwrap_or(false)
    }

    pub(crate) fn detach_buffers(&mut self) {
        if let Self::Index(req) | Self::Create(req) = self {
            req.source = bytes::Bytes::copy_from_slice(&req.source);
        }
    }
}

/// An item of a bulk shard request.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkItemRequest {
    id: u32,
    status: ItemStatus,
    operation: ItemOperation,
}

impl BulkItemRequest {
    /// Create a new pending item with the given positional ID.
    pub fn new(id: u32, operation: ItemOperation) -> Self {
        Self {
            id,
            status: ItemStatus::Pending,
            operation,
        }
    }

    pub(crate) fn from_parts(id: u32, status: ItemStatus, operation: ItemOperation) -> Self {
        Self { id, status, operation }
    }

    /// The positional ID of this item within the client's original batch.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn operation(&self) -> &ItemOperation {
        &self.operation
    }

    pub(crate) fn operation_mut(&mut self) -> &mut ItemOperation {
        &mut self.operation
    }

    pub(crate) fn set_status(&mut self, status: ItemStatus) {
        self.status = status;
    }
}

/// An ordered batch of independent document operations against one shard.
///
/// Once built the item sequence never changes; execution only updates each item's status and
/// version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkShardRequest {
    items: Vec<BulkItemRequest>,
}

impl BulkShardRequest {
    /// Create a new instance.
    pub fn new(items: Vec<BulkItemRequest>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[BulkItemRequest] {
        &self.items
    }

    pub(crate) fn items_mut(&mut self) -> &mut [BulkItemRequest] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split a client batch into one bulk shard request per target shard of the given index.
    ///
    /// Items are numbered by their position in `operations`, and keep their relative order
    /// within each shard request.
    pub fn group_by_shard(state: &ClusterState, index: &str, operations: Vec<ItemOperation>) -> Result<BTreeMap<u32, BulkShardRequest>, RoutingError> {
        let mut groups: BTreeMap<u32, BulkShardRequest> = BTreeMap::new();
        for (pos, operation) in operations.into_iter().enumerate() {
            let shard = OperationRouting::shard_id(state, index, operation.id(), operation.routing_value())?;
            groups.entry(shard).or_default().items.push(BulkItemRequest::new(pos as u32, operation));
        }
        Ok(groups)
    }
}
