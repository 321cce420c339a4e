//! Data models.

mod bulk;
mod proto;
mod proto_ext;
mod request;
mod response;

pub use bulk::{BulkItemRequest, BulkShardRequest, ItemOperation, ItemStatus};
pub use proto::*;
pub use request::{OperationKind, ReplicationRequest, ReplicationType, ShardOperation};
pub use response::{OperationResult, ReplicationResponse};

pub type BulkItemOutcome = proto::bulk_item_response::Outcome;
pub type ShardResponseOutcome = proto::shard_response::Outcome;
pub type ShardResponseFrameKind = proto::shard_response_frame::Frame;
