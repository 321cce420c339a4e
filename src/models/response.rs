use crate::cluster::ShardId;
use crate::models::proto::{BulkItemResponse, DeleteResponse, IndexResponse, ReplicaStats};

/// The primary's result for a shard operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationResult {
    Index(IndexResponse),
    Delete(DeleteResponse),
    /// Per-item outcomes, in original item order.
    Bulk(Vec<BulkItemResponse>),
}

/// The aggregated response of a replicated write.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicationResponse {
    /// The shard which executed the operation.
    pub shard_id: ShardId,
    pub result: OperationResult,
    pub replicas: ReplicaStats,
}

impl ReplicationResponse {
    /// The bulk item responses of this response, if it is a bulk response.
    pub fn bulk_items(&self) -> Option<&[BulkItemResponse]> {
        match &self.result {
            OperationResult::Bulk(items) => Some(items),
            _ => None,
        }
    }
}
