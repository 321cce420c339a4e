use crate::engine::{Engine, Origin};
use crate::error::EngineError;
use crate::models::{DeleteRequest, IndexRequest, ItemOperation, ItemStatus, ReplicationRequest, ShardOperation};
use crate::replication::refresh_after_writes;

/// Replay a shard operation, already executed by the primary, on a replica copy.
///
/// Bulk items are replayed in order. Items which failed on the primary are skipped, and an item
/// which fails to replay is logged without stopping the rest of the batch.
#[tracing::instrument(level = "trace", skip(engine, request), fields(shard = %engine.shard_id(), op = request.operation().name()))]
pub fn shard_operation_on_replica(engine: &dyn Engine, request: &ReplicationRequest) -> Result<(), EngineError> {
    match request.operation() {
        ShardOperation::Index(req) => index_on_replica(engine, req, false)?,
        ShardOperation::Create(req) => index_on_replica(engine, req, true)?,
        ShardOperation::Delete(req) => delete_on_replica(engine, req)?,
        ShardOperation::Bulk(bulk) => {
            for item in bulk.items().iter().filter(|item| item.status() == ItemStatus::Applied) {
                let res = match item.operation() {
                    ItemOperation::Index(req) => index_on_replica(engine, req, false),
                    ItemOperation::Create(req) => index_on_replica(engine, req, true),
                    ItemOperation::Delete(req) => delete_on_replica(engine, req),
                };
                if let Err(err) = res {
                    tracing::warn!(item_id = item.id(), error = %err, "failed to replay bulk item on replica");
                }
            }
        }
    }

    if request.refresh() {
        refresh_after_writes(engine);
    }
    Ok(())
}

fn index_on_replica(engine: &dyn Engine, req: &IndexRequest, create: bool) -> Result<(), EngineError> {
    if create {
        let mut op = engine.prepare_create(&req.doc_type, &req.id, req.source.clone(), req.version, Origin::Replica);
        engine.create(&mut op)
    } else {
        let mut op = engine.prepare_index(&req.doc_type, &req.id, req.source.clone(), req.version, Origin::Replica);
        engine.index(&mut op)
    }
}

fn delete_on_replica(engine: &dyn Engine, req: &DeleteRequest) -> Result<(), EngineError> {
    let mut op = engine.prepare_delete(&req.doc_type, &req.id, req.version, Origin::Replica);
    engine.delete(&mut op)
}
