//! Wire codec of shard requests and responses.
//!
//! Shard requests are framed by hand so that a receiver can validate the envelope, and skip over
//! payloads, without decoding every document. Payloads and responses are protobuf.
//!
//! Decoding a request from a `Bytes` frame is zero-copy: every document source of the decoded
//! request references the frame. Such requests are marked as holding unsafe buffers, and must
//! be prepared with `ReplicationRequest::prepare_for_dispatch` before being moved to a worker.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use uuid::Uuid;

use crate::cluster::{ClusterBlockLevel, NodeId, ShardId};
use crate::consistency::WriteConsistencyLevel;
use crate::error::{
    BlockedError, ConsistencyError, DecodeError, EngineError, PrimaryExecutionError, ReplicaFailure, ReplicationError, ReplicationResult, RoutingError,
    TransportError,
};
use crate::models::{
    BulkItemRequest, BulkShardRequest, BulkShardResponse, EngineErrorKind, FailureKind, ItemOperation, ItemStatus, OperationKind, OperationResult,
    ReplicaResponseFrame, ReplicaStats, ReplicationRequest, ReplicationResponse, ReplicationType, ShardOperation, ShardResponse, ShardResponseFrame,
    ShardResponseFrameKind, ShardResponseOutcome, WireFailure,
};

const FLAG_REFRESH: u8 = 0b001;
const FLAG_CHECK_CONSISTENCY: u8 = 0b010;
const FLAG_HAS_TIMEOUT: u8 = 0b100;
const FLAGS_KNOWN: u8 = FLAG_REFRESH | FLAG_CHECK_CONSISTENCY | FLAG_HAS_TIMEOUT;

/// The max number of bytes of a LEB128 encoded u64.
const MAX_VARINT_LEN: usize = 10;
/// The smallest possible encoding of a bulk item: id, kind, status and payload length.
const MIN_BULK_ITEM_LEN: usize = 4;

/// Encode the given request as a shard request frame.
pub fn encode_request(request: &ReplicationRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + request.index.len());
    buf.put_u8(request.operation.kind().id());
    put_str(&mut buf, &request.index);
    buf.put_slice(request.request_id.as_bytes());
    buf.put_u8(request.consistency.map(|level| level.id()).unwrap_or(0));
    buf.put_u8(request.replication_type.map(|rtype| rtype.id()).unwrap_or(0));

    let mut flags = 0u8;
    if request.refresh {
        flags |= FLAG_REFRESH;
    }
    if request.check_write_consistency {
        flags |= FLAG_CHECK_CONSISTENCY;
    }
    if request.timeout.is_some() {
        flags |= FLAG_HAS_TIMEOUT;
    }
    buf.put_u8(flags);
    if let Some(timeout) = request.timeout {
        prost::encoding::encode_varint(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), &mut buf);
    }
    prost::encoding::encode_varint(u64::from(request.shard_id), &mut buf);

    match &request.operation {
        ShardOperation::Index(req) | ShardOperation::Create(req) => put_payload(&mut buf, req),
        ShardOperation::Delete(req) => put_payload(&mut buf, req),
        ShardOperation::Bulk(bulk) => {
            prost::encoding::encode_varint(bulk.len() as u64, &mut buf);
            for item in bulk.items() {
                prost::encoding::encode_varint(u64::from(item.id()), &mut buf);
                buf.put_u8(item_kind(item.operation()).id());
                buf.put_u8(item.status().id());
                match item.operation() {
                    ItemOperation::Index(req) | ItemOperation::Create(req) => put_payload(&mut buf, req),
                    ItemOperation::Delete(req) => put_payload(&mut buf, req),
                }
            }
        }
    }
    buf.freeze()
}

/// Decode a shard request frame.
///
/// Decoding is all or nothing, any malformed or truncated content fails the whole frame.
pub fn decode_request(frame: Bytes) -> Result<ReplicationRequest, DecodeError> {
    let mut reader = FrameReader::new(frame);
    let kind_id = reader.u8("operation kind")?;
    let kind = OperationKind::from_id(kind_id).ok_or(DecodeError::UnknownTag {
        field: "operation kind",
        tag: kind_id,
    })?;
    let index = reader.string("index")?;
    if index.is_empty() {
        return Err(DecodeError::MissingField("index"));
    }
    let request_id = reader.uuid("request id")?;
    let consistency = match reader.u8("consistency")? {
        0 => None,
        tag => Some(WriteConsistencyLevel::from_id(tag).ok_or(DecodeError::UnknownTag { field: "consistency", tag })?),
    };
    let replication_type = match reader.u8("replication type")? {
        0 => None,
        tag => Some(ReplicationType::from_id(tag).ok_or(DecodeError::UnknownTag { field: "replication type", tag })?),
    };
    let flags = reader.u8("flags")?;
    if flags & !FLAGS_KNOWN != 0 {
        return Err(DecodeError::UnknownTag { field: "flags", tag: flags });
    }
    let timeout = if flags & FLAG_HAS_TIMEOUT != 0 {
        Some(Duration::from_millis(reader.varint("timeout")?))
    } else {
        None
    };
    let shard_id = reader.u32("shard id")?;

    let operation = match kind {
        OperationKind::Index => ShardOperation::Index(reader.payload("index payload")?),
        OperationKind::Create => ShardOperation::Create(reader.payload("create payload")?),
        OperationKind::Delete => ShardOperation::Delete(reader.payload("delete payload")?),
        OperationKind::Bulk => ShardOperation::Bulk(decode_bulk(&mut reader)?),
    };
    reader.finish()?;

    Ok(ReplicationRequest {
        request_id,
        index,
        shard_id,
        consistency,
        check_write_consistency: flags & FLAG_CHECK_CONSISTENCY != 0,
        replication_type,
        timeout,
        refresh: flags & FLAG_REFRESH != 0,
        unsafe_buffers: operation.references_buffers(),
        operation,
    })
}

fn decode_bulk(reader: &mut FrameReader) -> Result<BulkShardRequest, DecodeError> {
    let count = reader.varint("item count")?;
    if count > (reader.remaining() / MIN_BULK_ITEM_LEN) as u64 {
        return Err(DecodeError::Truncated("bulk items"));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader.u32("item id")?;
        let kind_id = reader.u8("item kind")?;
        let status_id = reader.u8("item status")?;
        let status = ItemStatus::from_id(status_id).ok_or(DecodeError::UnknownTag {
            field: "item status",
            tag: status_id,
        })?;
        let operation = match OperationKind::from_id(kind_id) {
            Some(OperationKind::Index) => ItemOperation::Index(reader.payload("item payload")?),
            Some(OperationKind::Create) => ItemOperation::Create(reader.payload("item payload")?),
            Some(OperationKind::Delete) => ItemOperation::Delete(reader.payload("item payload")?),
            Some(OperationKind::Bulk) | None => return Err(DecodeError::UnknownTag { field: "item kind", tag: kind_id }),
        };
        items.push(BulkItemRequest::from_parts(id, status, operation));
    }
    Ok(BulkShardRequest::new(items))
}

fn item_kind(operation: &ItemOperation) -> OperationKind {
    match operation {
        ItemOperation::Index(_) => OperationKind::Index,
        ItemOperation::Create(_) => OperationKind::Create,
        ItemOperation::Delete(_) => OperationKind::Delete,
    }
}

fn put_str(buf: &mut BytesMut, val: &str) {
    prost::encoding::encode_varint(val.len() as u64, buf);
    buf.put_slice(val.as_bytes());
}

fn put_payload<M: Message>(buf: &mut BytesMut, payload: &M) {
    buf.put_slice(&payload.encode_length_delimited_to_vec());
}

/// A bounds checked reader over a frame.
struct FrameReader {
    buf: Bytes,
}

impl FrameReader {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        if !self.buf.has_remaining() {
            return Err(DecodeError::Truncated(field));
        }
        Ok(self.buf.get_u8())
    }

    fn varint(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        let window = &self.buf[..self.buf.len().min(MAX_VARINT_LEN)];
        if !window.iter().any(|byte| byte & 0x80 == 0) {
            return Err(if window.len() < MAX_VARINT_LEN {
                DecodeError::Truncated(field)
            } else {
                DecodeError::InvalidVarint(field)
            });
        }
        prost::encoding::decode_varint(&mut self.buf).map_err(|_| DecodeError::InvalidVarint(field))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let val = self.varint(field)?;
        u32::try_from(val).map_err(|_| DecodeError::OutOfRange(field))
    }

    /// Read a length prefixed slice of the frame, without copying.
    fn bytes(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.varint(field)?;
        if len > self.buf.remaining() as u64 {
            return Err(DecodeError::Truncated(field));
        }
        Ok(self.buf.split_to(len as usize))
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
    }

    fn uuid(&mut self, field: &'static str) -> Result<Uuid, DecodeError> {
        if self.buf.remaining() < 16 {
            return Err(DecodeError::Truncated(field));
        }
        let raw = self.buf.split_to(16);
        Uuid::from_slice(&raw).map_err(|_| DecodeError::OutOfRange(field))
    }

    /// Decode a length prefixed protobuf payload, referencing the frame for any bytes fields.
    fn payload<M: Message + Default>(&mut self, field: &'static str) -> Result<M, DecodeError> {
        let raw = self.bytes(field)?;
        M::decode(raw).map_err(|source| DecodeError::Payload { field, source })
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.buf.remaining() {
            0 => Ok(()),
            trailing => Err(DecodeError::TrailingBytes(trailing)),
        }
    }
}

/// Encode the outcome of a primary action as a response frame.
pub fn encode_response(res: &ReplicationResult<ReplicationResponse>) -> Bytes {
    let frame = match res {
        Ok(response) => ShardResponseFrameKind::Response(response_to_wire(response)),
        Err(err) => ShardResponseFrameKind::Failure(failure_to_wire(err)),
    };
    Bytes::from(ShardResponseFrame { frame: Some(frame) }.encode_to_vec())
}

/// Decode a response frame received from the given node.
pub fn decode_response(frame: Bytes, node_id: &NodeId) -> ReplicationResult<ReplicationResponse> {
    let frame = ShardResponseFrame::decode(frame).map_err(|source| DecodeError::Payload { field: "shard response", source })?;
    match frame.frame {
        Some(ShardResponseFrameKind::Response(response)) => Ok(response_from_wire(response)?),
        Some(ShardResponseFrameKind::Failure(failure)) => Err(failure_from_wire(failure, node_id)),
        None => Err(DecodeError::MissingField("shard response frame").into()),
    }
}

/// Encode the outcome of a replica action as a response frame.
pub fn encode_replica_ack(res: &Result<(), ReplicaFailure>) -> Bytes {
    let failure = res.as_ref().err().map(|err| match err {
        ReplicaFailure::Engine(engine) => {
            let mut wire = new_failure(FailureKind::Engine, engine.to_string());
            engine_to_wire(engine, &mut wire);
            wire
        }
        other => new_failure(FailureKind::Remote, other.to_string()),
    });
    Bytes::from(ReplicaResponseFrame { failure }.encode_to_vec())
}

/// Decode a replica response frame received from the given node.
pub fn decode_replica_ack(frame: Bytes, node_id: &NodeId) -> Result<(), ReplicaFailure> {
    let frame = ReplicaResponseFrame::decode(frame).map_err(|err| ReplicaFailure::Remote(format!("invalid replica response from node [{}]: {}", node_id, err)))?;
    match frame.failure {
        None => Ok(()),
        Some(failure) if failure.kind() == FailureKind::Engine => Err(ReplicaFailure::Engine(engine_from_wire(&failure))),
        Some(failure) => Err(ReplicaFailure::Remote(failure.message)),
    }
}

fn response_to_wire(response: &ReplicationResponse) -> ShardResponse {
    let outcome = match &response.result {
        OperationResult::Index(res) => ShardResponseOutcome::Index(res.clone()),
        OperationResult::Delete(res) => ShardResponseOutcome::Delete(res.clone()),
        OperationResult::Bulk(items) => ShardResponseOutcome::Bulk(BulkShardResponse { items: items.clone() }),
    };
    ShardResponse {
        index: response.shard_id.index.clone(),
        shard: response.shard_id.id,
        replicas: Some(response.replicas),
        outcome: Some(outcome),
    }
}

fn response_from_wire(response: ShardResponse) -> Result<ReplicationResponse, DecodeError> {
    let result = match response.outcome {
        Some(ShardResponseOutcome::Index(res)) => OperationResult::Index(res),
        Some(ShardResponseOutcome::Delete(res)) => OperationResult::Delete(res),
        Some(ShardResponseOutcome::Bulk(res)) => OperationResult::Bulk(res.items),
        None => return Err(DecodeError::MissingField("shard response outcome")),
    };
    Ok(ReplicationResponse {
        shard_id: ShardId::new(response.index, response.shard),
        result,
        replicas: response.replicas.unwrap_or_else(ReplicaStats::default),
    })
}

fn new_failure(kind: FailureKind, message: String) -> WireFailure {
    WireFailure {
        kind: kind as i32,
        message,
        ..Default::default()
    }
}

fn failure_to_wire(err: &ReplicationError) -> WireFailure {
    let message = err.to_string();
    match err {
        ReplicationError::Blocked(blocked) => WireFailure {
            block_id: blocked.block_id,
            block_level: u32::from(blocked.level.id()),
            block_index: blocked.index.clone(),
            detail: blocked.description.clone(),
            ..new_failure(FailureKind::Blocked, message)
        },
        ReplicationError::Routing(RoutingError::IndexNotFound { index }) => WireFailure {
            index: index.clone(),
            ..new_failure(FailureKind::IndexNotFound, message)
        },
        ReplicationError::Routing(RoutingError::ShardNotFound { shard_id }) => WireFailure {
            index: shard_id.index.clone(),
            shard: shard_id.id,
            ..new_failure(FailureKind::ShardNotFound, message)
        },
        ReplicationError::Routing(RoutingError::PrimaryNotLocal { shard_id, node_id }) => WireFailure {
            index: shard_id.index.clone(),
            shard: shard_id.id,
            node: node_id.clone(),
            ..new_failure(FailureKind::PrimaryNotLocal, message)
        },
        ReplicationError::Consistency(ConsistencyError::Timeout {
            shard_id,
            level,
            required,
            active,
            primary_active,
            waited,
        }) => WireFailure {
            index: shard_id.index.clone(),
            shard: shard_id.id,
            consistency: u32::from(level.id()),
            required: *required,
            active: *active,
            primary_active: *primary_active,
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            ..new_failure(FailureKind::ConsistencyTimeout, message)
        },
        ReplicationError::PrimaryExecution(primary) => {
            let mut wire = WireFailure {
                index: primary.shard_id.index.clone(),
                shard: primary.shard_id.id,
                ..new_failure(FailureKind::PrimaryExecution, message)
            };
            engine_to_wire(&primary.source, &mut wire);
            wire
        }
        _ => new_failure(FailureKind::Remote, message),
    }
}

fn failure_from_wire(failure: WireFailure, node_id: &NodeId) -> ReplicationError {
    let shard_id = ShardId::new(failure.index.clone(), failure.shard);
    match failure.kind() {
        FailureKind::Blocked => match u8::try_from(failure.block_level).ok().and_then(ClusterBlockLevel::from_id) {
            Some(level) => BlockedError {
                block_id: failure.block_id,
                description: failure.detail,
                level,
                index: failure.block_index,
            }
            .into(),
            None => remote(failure.message, node_id),
        },
        FailureKind::IndexNotFound => RoutingError::IndexNotFound { index: failure.index }.into(),
        FailureKind::ShardNotFound => RoutingError::ShardNotFound { shard_id }.into(),
        FailureKind::PrimaryNotLocal => RoutingError::PrimaryNotLocal {
            shard_id,
            node_id: failure.node,
        }
        .into(),
        FailureKind::ConsistencyTimeout => match u8::try_from(failure.consistency).ok().and_then(WriteConsistencyLevel::from_id) {
            Some(level) => ConsistencyError::Timeout {
                shard_id,
                level,
                required: failure.required,
                active: failure.active,
                primary_active: failure.primary_active,
                waited: Duration::from_millis(failure.waited_ms),
            }
            .into(),
            None => remote(failure.message, node_id),
        },
        FailureKind::PrimaryExecution => PrimaryExecutionError {
            source: engine_from_wire(&failure),
            shard_id,
        }
        .into(),
        FailureKind::Engine | FailureKind::Remote => remote(failure.message, node_id),
    }
}

fn remote(message: String, node_id: &NodeId) -> ReplicationError {
    TransportError::Remote {
        node_id: node_id.clone(),
        message,
    }
    .into()
}

fn engine_to_wire(err: &EngineError, wire: &mut WireFailure) {
    match err {
        EngineError::VersionConflict {
            doc_type,
            id,
            current,
            provided,
        } => {
            wire.engine_kind = EngineErrorKind::VersionConflict as i32;
            wire.doc_type = doc_type.clone();
            wire.doc_id = id.clone();
            wire.current_version = *current;
            wire.provided_version = *provided;
        }
        EngineError::DocumentAlreadyExists { doc_type, id } => {
            wire.engine_kind = EngineErrorKind::DocumentAlreadyExists as i32;
            wire.doc_type = doc_type.clone();
            wire.doc_id = id.clone();
        }
        EngineError::ShardMissing { shard_id } => {
            wire.engine_kind = EngineErrorKind::ShardMissing as i32;
            wire.index = shard_id.index.clone();
            wire.shard = shard_id.id;
        }
        EngineError::Closed { shard_id } => {
            wire.engine_kind = EngineErrorKind::Closed as i32;
            wire.index = shard_id.index.clone();
            wire.shard = shard_id.id;
        }
        EngineError::Storage(detail) => {
            wire.engine_kind = EngineErrorKind::Storage as i32;
            wire.detail = detail.clone();
        }
    }
}

fn engine_from_wire(wire: &WireFailure) -> EngineError {
    let shard_id = || ShardId::new(wire.index.clone(), wire.shard);
    match wire.engine_kind() {
        EngineErrorKind::VersionConflict => EngineError::VersionConflict {
            doc_type: wire.doc_type.clone(),
            id: wire.doc_id.clone(),
            current: wire.current_version,
            provided: wire.provided_version,
        },
        EngineErrorKind::DocumentAlreadyExists => EngineError::DocumentAlreadyExists {
            doc_type: wire.doc_type.clone(),
            id: wire.doc_id.clone(),
        },
        EngineErrorKind::ShardMissing => EngineError::ShardMissing { shard_id: shard_id() },
        EngineErrorKind::Closed => EngineError::Closed { shard_id: shard_id() },
        EngineErrorKind::Storage => EngineError::Storage(wire.detail.clone()),
    }
}
