use crate::engine::{Engine, Origin};
use crate::error::{EngineError, PrimaryExecutionError};
use crate::models::{
    BulkItemResponse, DeleteRequest, DeleteResponse, IndexRequest, IndexResponse, ItemOperation, ItemStatus, OperationResult, ReplicationRequest, ShardOperation,
};
use crate::replication::{refresh_after_writes, METRIC_BULK_ITEM_FAILURES};

/// The outcome of a shard operation on the primary.
#[derive(Debug)]
pub struct PrimaryOutcome {
    /// The request in the form accepted by the primary, which is what replicas receive.
    pub request: ReplicationRequest,
    pub result: OperationResult,
}

/// Execute a shard operation on the primary copy.
///
/// Versions assigned by the primary are recorded into the returned request. For bulk requests,
/// each item is applied in order and a failing item is recorded in its own slot, marked as
/// failed so that replicas skip it.
#[tracing::instrument(level = "trace", skip(engine, request), fields(shard = %engine.shard_id(), op = request.operation().name()))]
pub fn shard_operation_on_primary(engine: &dyn Engine, mut request: ReplicationRequest) -> Result<PrimaryOutcome, PrimaryExecutionError> {
    let fail = |source: EngineError| PrimaryExecutionError {
        shard_id: engine.shard_id().clone(),
        source,
    };

    let result = match &mut request.operation {
        ShardOperation::Index(req) => OperationResult::Index(index_on_primary(engine, req, false).map_err(fail)?),
        ShardOperation::Create(req) => OperationResult::Index(index_on_primary(engine, req, true).map_err(fail)?),
        ShardOperation::Delete(req) => OperationResult::Delete(delete_on_primary(engine, req).map_err(fail)?),
        ShardOperation::Bulk(bulk) => {
            let mut responses = Vec::with_capacity(bulk.len());
            for item in bulk.items_mut() {
                let (item_id, op_type) = (item.id(), item.operation().op_type());
                let res = match item.operation_mut() {
                    ItemOperation::Index(req) => index_on_primary(engine, req, false).map(|res| res.version),
                    ItemOperation::Create(req) => index_on_primary(engine, req, true).map(|res| res.version),
                    ItemOperation::Delete(req) => delete_on_primary(engine, req).map(|res| res.version),
                };
                let operation = item.operation();
                match res {
                    Ok(version) => {
                        responses.push(BulkItemResponse::success(item_id, op_type, operation.doc_type(), operation.id(), version));
                        item.set_status(ItemStatus::Applied);
                    }
                    Err(err) => {
                        tracing::debug!(item_id, error = %err, "bulk item failed on primary");
                        metrics::increment_counter!(METRIC_BULK_ITEM_FAILURES);
                        responses.push(BulkItemResponse::failure(item_id, op_type, operation.doc_type(), operation.id(), err.to_string()));
                        item.set_status(ItemStatus::Failed);
                    }
                }
            }
            OperationResult::Bulk(responses)
        }
    };

    if request.refresh {
        refresh_after_writes(engine);
    }
    Ok(PrimaryOutcome { request, result })
}

/// Apply an index or create on the primary, recording the assigned version into the request.
fn index_on_primary(engine: &dyn Engine, req: &mut IndexRequest, create: bool) -> Result<IndexResponse, EngineError> {
    let res = if create {
        let mut op = engine.prepare_create(&req.doc_type, &req.id, req.source.clone(), req.version, Origin::Primary);
        engine.create(&mut op).map(|_| op)
    } else {
        let mut op = engine.prepare_index(&req.doc_type, &req.id, req.source.clone(), req.version, Origin::Primary);
        engine.index(&mut op).map(|_| op)
    };
    let op = res?;
    req.version = op.version;
    Ok(IndexResponse {
        doc_type: op.doc_type,
        id: op.id,
        version: op.version,
        created: op.created,
    })
}

/// Apply a delete on the primary, recording the assigned version into the request.
fn delete_on_primary(engine: &dyn Engine, req: &mut DeleteRequest) -> Result<DeleteResponse, EngineError> {
    let mut op = engine.prepare_delete(&req.doc_type, &req.id, req.version, Origin::Primary);
    engine.delete(&mut op)?;
    req.version = op.version;
    Ok(DeleteResponse {
        doc_type: op.doc_type,
        id: op.id,
        version: op.version,
        found: op.found,
    })
}
