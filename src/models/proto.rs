/// A request to index a document.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexRequest {
    /// The type of the document.
    #[prost(string, tag = "1")]
    pub doc_type: ::prost::alloc::string::String,
    /// The ID of the document.
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// An optional routing value, used instead of the ID to compute the document's shard.
    #[prost(string, optional, tag = "3")]
    pub routing: ::core::option::Option<::prost::alloc::string::String>,
    /// The source of the document.
    ///
    /// When decoded from a network frame, this buffer references the frame.
    #[prost(bytes = "bytes", tag = "4")]
    pub source: ::prost::bytes::Bytes,
    /// The version of the document.
    ///
    /// On a client request, a non-zero value is the version the document is expected to have.
    /// Once executed on the primary, this is the version the primary assigned.
    #[prost(uint64, tag = "5")]
    pub version: u64,
}
/// A request to delete a document.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRequest {
    /// The type of the document.
    #[prost(string, tag = "1")]
    pub doc_type: ::prost::alloc::string::String,
    /// The ID of the document.
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// An optional routing value, used instead of the ID to compute the document's shard.
    #[prost(string, optional, tag = "3")]
    pub routing: ::core::option::Option<::prost::alloc::string::String>,
    /// The version of the document, with the same semantics as `IndexRequest.version`.
    #[prost(uint64, tag = "4")]
    pub version: u64,
}
/// A document as stored by a shard engine.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredDocument {
    /// The current version of the document.
    #[prost(uint64, required, tag = "1")]
    pub version: u64,
    /// The source of the document.
    #[prost(bytes = "vec", required, tag = "2")]
    pub source: ::prost::alloc::vec::Vec<u8>,
    /// True if this record is the tombstone of a deleted document.
    #[prost(bool, tag = "3")]
    pub deleted: bool,
}
/// The response to an index or create operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexResponse {
    #[prost(string, tag = "1")]
    pub doc_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// The version assigned to the document by the primary.
    #[prost(uint64, tag = "3")]
    pub version: u64,
    /// True if the document did not exist before this operation.
    #[prost(bool, tag = "4")]
    pub created: bool,
}
/// The response to a delete operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteResponse {
    #[prost(string, tag = "1")]
    pub doc_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// The version assigned to the delete by the primary.
    #[prost(uint64, tag = "3")]
    pub version: u64,
    /// True if the document existed.
    #[prost(bool, tag = "4")]
    pub found: bool,
}
/// The outcome of a single item of a bulk shard request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BulkItemResponse {
    /// The positional ID of the item within the client's original batch.
    #[prost(uint32, tag = "1")]
    pub item_id: u32,
    /// The kind of operation the item performed.
    #[prost(enumeration = "OpType", tag = "2")]
    pub op_type: i32,
    #[prost(string, tag = "3")]
    pub doc_type: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub id: ::prost::alloc::string::String,
    /// The outcome of the item.
    #[prost(oneof = "bulk_item_response::Outcome", tags = "10, 11")]
    pub outcome: ::core::option::Option<bulk_item_response::Outcome>,
}
/// Nested message and enum types in `BulkItemResponse`.
pub mod bulk_item_response {
    /// The outcome of a bulk item.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        /// The item was applied, and the primary assigned it this version.
        #[prost(uint64, tag = "10")]
        Version(u64),
        /// The item failed on the primary with the given message.
        #[prost(string, tag = "11")]
        Failure(::prost::alloc::string::String),
    }
}
/// The per-item outcomes of a bulk shard request, in original item order.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BulkShardResponse {
    #[prost(message, repeated, tag = "1")]
    pub items: ::prost::alloc::vec::Vec<BulkItemResponse>,
}
/// Replica accounting for a replicated write.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ReplicaStats {
    /// The number of replica copies the operation was sent to.
    #[prost(uint32, tag = "1")]
    pub total: u32,
    /// The number of replicas which applied the operation.
    #[prost(uint32, tag = "2")]
    pub successful: u32,
    /// The number of replicas which failed to apply the operation.
    #[prost(uint32, tag = "3")]
    pub failed: u32,
    /// The number of replicas whose outcome was not awaited.
    #[prost(uint32, tag = "4")]
    pub pending: u32,
}
/// The successful response of a shard operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardResponse {
    /// The index of the shard which executed the operation.
    #[prost(string, tag = "1")]
    pub index: ::prost::alloc::string::String,
    /// The ID of the shard which executed the operation.
    #[prost(uint32, tag = "2")]
    pub shard: u32,
    #[prost(message, optional, tag = "3")]
    pub replicas: ::core::option::Option<ReplicaStats>,
    /// The primary's result for the operation.
    #[prost(oneof = "shard_response::Outcome", tags = "10, 11, 12")]
    pub outcome: ::core::option::Option<shard_response::Outcome>,
}
/// Nested message and enum types in `ShardResponse`.
pub mod shard_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        #[prost(message, tag = "10")]
        Index(super::IndexResponse),
        #[prost(message, tag = "11")]
        Delete(super::DeleteResponse),
        #[prost(message, tag = "12")]
        Bulk(super::BulkShardResponse),
    }
}
/// A terminal error which crossed the wire.
///
/// Only the fields relevant to the given kind are populated.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireFailure {
    #[prost(enumeration = "FailureKind", tag = "1")]
    pub kind: i32,
    /// The display form of the original error.
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub index: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub shard: u32,
    #[prost(string, tag = "5")]
    pub node: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub block_id: u32,
    #[prost(uint32, tag = "7")]
    pub block_level: u32,
    /// The blocked index, absent when the block is cluster wide.
    #[prost(string, optional, tag = "8")]
    pub block_index: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, tag = "9")]
    pub consistency: u32,
    #[prost(uint32, tag = "10")]
    pub required: u32,
    #[prost(uint32, tag = "11")]
    pub active: u32,
    #[prost(bool, tag = "12")]
    pub primary_active: bool,
    #[prost(uint64, tag = "13")]
    pub waited_ms: u64,
    #[prost(enumeration = "EngineErrorKind", tag = "14")]
    pub engine_kind: i32,
    #[prost(string, tag = "15")]
    pub doc_type: ::prost::alloc::string::String,
    #[prost(string, tag = "16")]
    pub doc_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "17")]
    pub current_version: u64,
    #[prost(uint64, tag = "18")]
    pub provided_version: u64,
    /// The detail of a storage engine failure.
    #[prost(string, tag = "19")]
    pub detail: ::prost::alloc::string::String,
}
/// The response frame of a primary action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardResponseFrame {
    #[prost(oneof = "shard_response_frame::Frame", tags = "1, 2")]
    pub frame: ::core::option::Option<shard_response_frame::Frame>,
}
/// Nested message and enum types in `ShardResponseFrame`.
pub mod shard_response_frame {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Response(super::ShardResponse),
        #[prost(message, tag = "2")]
        Failure(super::WireFailure),
    }
}
/// The response frame of a replica action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicaResponseFrame {
    /// The failure of the replica, absent when the replica applied the operation.
    #[prost(message, optional, tag = "1")]
    pub failure: ::core::option::Option<WireFailure>,
}
/// The kind of a document operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OpType {
    Index = 0,
    Create = 1,
    Delete = 2,
}
/// The kind of a terminal error which crossed the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FailureKind {
    /// An error which has no typed form on the receiving side.
    Remote = 0,
    Blocked = 1,
    IndexNotFound = 2,
    ShardNotFound = 3,
    PrimaryNotLocal = 4,
    ConsistencyTimeout = 5,
    PrimaryExecution = 6,
    /// A storage engine failure, used by replicas.
    Engine = 7,
}
/// The kind of a storage engine failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EngineErrorKind {
    Storage = 0,
    VersionConflict = 1,
    DocumentAlreadyExists = 2,
    ShardMissing = 3,
    Closed = 4,
}
