//! Hadron shard error abstractions.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::{ClusterBlockLevel, NodeId, ShardId};
use crate::consistency::WriteConsistencyLevel;

// Error messages.
pub const ERR_DB_FLUSH: &str = "error flushing database state";

/// The error type returned from executing a replicated write.
///
/// Every variant here is terminal for the request which produced it. Replica failures are
/// deliberately absent, as they never change the outcome observed by the caller.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The target index or the cluster is blocked for writes.
    #[error(transparent)]
    Blocked(#[from] BlockedError),
    /// The request could not be resolved against the routing table.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Not enough shard copies became active before the request timed out.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    /// The primary shard failed to apply the operation.
    #[error(transparent)]
    PrimaryExecution(#[from] PrimaryExecutionError),
    /// The request envelope could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The request could not be delivered to the node hosting the primary.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A fatal internal error, typically from the blocking worker pool.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// An administrative block prevents the operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("blocked by: [{block_id}/{description}] at level {level}{}", index_suffix(.index))]
pub struct BlockedError {
    /// The ID of the offending block.
    pub block_id: u32,
    /// The description of the offending block.
    pub description: String,
    /// The level which was checked.
    pub level: ClusterBlockLevel,
    /// The blocked index, or `None` when the block is cluster wide.
    pub index: Option<String>,
}

fn index_suffix(index: &Option<String>) -> String {
    index.as_ref().map(|idx| format!(" on index [{}]", idx)).unwrap_or_default()
}

/// Routing table resolution errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// The target index has no routing table.
    #[error("no routing table found for index [{index}]")]
    IndexNotFound { index: String },
    /// The target shard is absent from the index's routing table.
    #[error("no shards iterator found for shard {shard_id}")]
    ShardNotFound { shard_id: ShardId },
    /// A forwarded request arrived at a node which does not host the shard's primary.
    #[error("primary of shard {shard_id} is not allocated on node [{node_id}]")]
    PrimaryNotLocal { shard_id: ShardId, node_id: NodeId },
    /// A routing table was built with more than one primary for a shard.
    #[error("shard {shard_id} has more than one primary copy")]
    MultiplePrimaries { shard_id: ShardId },
    /// A routing entry was placed under the wrong shard.
    #[error("routing entry for shard {found} placed under shard {expected}")]
    ShardMismatch { expected: ShardId, found: ShardId },
}

/// Write consistency errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The required number of active copies was not reached before the deadline.
    #[error("timed out after {waited:?} waiting for {required} active copies of shard {shard_id} (consistency {level}), found {active} active, primary active: {primary_active}")]
    Timeout {
        shard_id: ShardId,
        level: WriteConsistencyLevel,
        required: u32,
        active: u32,
        primary_active: bool,
        waited: Duration,
    },
}

/// The primary shard failed to apply the operation.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("primary shard {shard_id} failed to execute operation: {source}")]
pub struct PrimaryExecutionError {
    pub shard_id: ShardId,
    #[source]
    pub source: EngineError,
}

/// A replica shard failed to apply the operation.
///
/// These are reported to the shard state collaborator and never surfaced to callers.
#[derive(Debug, Error)]
#[error("replica of shard {shard_id} on node [{node_id}] failed: {kind}")]
pub struct ReplicaExecutionError {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub kind: ReplicaFailure,
}

impl ReplicaExecutionError {
    /// Failures which only indicate that the replica is not (yet) there, and which the cluster
    /// will notice on its own.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            &self.kind,
            ReplicaFailure::Engine(EngineError::ShardMissing { .. }) | ReplicaFailure::Transport(TransportError::NodeDisconnected(_))
        )
    }
}

/// The cause of a replica failure.
#[derive(Debug, Error)]
pub enum ReplicaFailure {
    #[error("{0}")]
    Engine(EngineError),
    #[error("{0}")]
    Transport(TransportError),
    #[error("{0}")]
    Remote(String),
}

/// Storage engine failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("[{doc_type}][{id}]: version conflict, current [{current}], provided [{provided}]")]
    VersionConflict { doc_type: String, id: String, current: u64, provided: u64 },
    #[error("[{doc_type}][{id}]: document already exists")]
    DocumentAlreadyExists { doc_type: String, id: String },
    #[error("shard {shard_id} is not allocated on this node")]
    ShardMissing { shard_id: ShardId },
    #[error("engine for shard {shard_id} is closed")]
    Closed { shard_id: ShardId },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// Wrap a storage level error, keeping its full context chain.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

/// Wire envelope decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame truncated while reading {0}")]
    Truncated(&'static str),
    #[error("invalid varint while reading {0}")]
    InvalidVarint(&'static str),
    #[error("value out of range for {0}")]
    OutOfRange(&'static str),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown {field} tag {tag}")]
    UnknownTag { field: &'static str, tag: u8 },
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("{0} trailing bytes after end of frame")]
    TrailingBytes(usize),
    #[error("invalid {field} payload: {source}")]
    Payload {
        field: &'static str,
        #[source]
        source: prost::DecodeError,
    },
}

/// Transport errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("node [{0}] is not known to the transport")]
    UnknownNode(NodeId),
    #[error("node [{0}] is disconnected")]
    NodeDisconnected(NodeId),
    #[error("remote failure on node [{node_id}]: {message}")]
    Remote { node_id: NodeId, message: String },
}

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, thiserror::Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;

/// A result type used for replicated writes.
pub type ReplicationResult<T> = ::std::result::Result<T, ReplicationError>;
