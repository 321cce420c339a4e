use std::time::Duration;

use anyhow::{Context, Result};

use crate::cluster::{ShardId, ShardState, INDEX_READ_ONLY, NO_MASTER};
use crate::codec;
use crate::consistency::WriteConsistencyLevel;
use crate::engine::Engine;
use crate::error::{ConsistencyError, EngineError, ReplicationError, RoutingError, TransportError};
use crate::fixtures::{self, TestCluster, TEST_DOC_TYPE, TEST_INDEX};
use crate::models::{BulkItemRequest, BulkShardRequest, OperationResult, ReplicationRequest, ReplicationType};

fn index_request(id: &str) -> ReplicationRequest {
    ReplicationRequest::new(TEST_INDEX, 0, fixtures::index_op(id).into())
}

fn stored_version(engine: &dyn Engine, id: &str) -> Result<Option<u64>> {
    Ok(engine.get(TEST_DOC_TYPE, id)?.map(|doc| doc.version))
}

#[tokio::test]
async fn index_is_applied_on_primary_and_replicas() -> Result<()> {
    let cluster = TestCluster::start(3, 1, 2).await?;

    let response = cluster.coordinator(0).execute(index_request("doc-1")).await?;

    let version = match &response.result {
        OperationResult::Index(res) => res.version,
        other => anyhow::bail!("expected index result, got {:?}", other),
    };
    assert!(version == 1, "expected version 1, got {}", version);
    assert!(response.replicas.total == 2, "expected 2 replicas, got {:?}", response.replicas);
    assert!(response.replicas.successful == 2, "expected 2 successful replicas, got {:?}", response.replicas);
    for node in 0..3 {
        let engine = cluster.engine(node, 0)?;
        let stored = stored_version(engine.as_ref(), "doc-1")?;
        assert!(stored == Some(1), "expected version 1 on node {}, got {:?}", node, stored);
    }
    Ok(())
}

#[tokio::test]
async fn blocked_requests_never_reach_an_engine() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.cluster.update(|builder| builder.index_block(TEST_INDEX, INDEX_READ_ONLY));

    let res = cluster.coordinator(0).execute(index_request("doc-1")).await;

    assert!(
        matches!(&res, Err(ReplicationError::Blocked(err)) if err.block_id == INDEX_READ_ONLY.id),
        "expected index read-only block, got {:?}",
        res
    );
    assert!(cluster.total_writes() == 0, "expected no engine writes, got {}", cluster.total_writes());
    Ok(())
}

#[tokio::test]
async fn global_blocks_are_reported_before_routing() -> Result<()> {
    let cluster = TestCluster::start(1, 1, 0).await?;
    cluster.cluster.update(|builder| builder.global_block(NO_MASTER));

    let res = cluster.coordinator(0).execute(ReplicationRequest::new("unknown-index", 0, fixtures::index_op("doc-1").into())).await;

    assert!(
        matches!(&res, Err(ReplicationError::Blocked(err)) if err.block_id == NO_MASTER.id),
        "expected no master block ahead of the missing index, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn unknown_shards_fail_without_waiting() -> Result<()> {
    let cluster = TestCluster::start(1, 2, 0).await?;

    let res = cluster
        .coordinator(0)
        .execute(ReplicationRequest::new(TEST_INDEX, 9, fixtures::index_op("doc-1").into()).with_timeout(Duration::from_secs(30)))
        .await;

    assert!(
        matches!(&res, Err(ReplicationError::Routing(RoutingError::ShardNotFound { shard_id })) if shard_id.id == 9),
        "expected shard not found, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn quorum_times_out_when_too_few_copies_are_active() -> Result<()> {
    let cluster = TestCluster::start_with_routing(1, vec![fixtures::shard_copies(0, &[ShardState::Unassigned, ShardState::Unassigned])]).await?;

    let res = cluster
        .coordinator(0)
        .execute(index_request("doc-1").with_timeout(Duration::from_millis(100)))
        .await;

    let (required, active, waited) = match res {
        Err(ReplicationError::Consistency(ConsistencyError::Timeout { required, active, waited, .. })) => (required, active, waited),
        other => anyhow::bail!("expected consistency timeout, got {:?}", other),
    };
    assert!(required == 2, "expected 2 required copies, got {}", required);
    assert!(active == 1, "expected 1 active copy, got {}", active);
    assert!(waited >= Duration::from_millis(100), "expected to wait out the timeout, waited {:?}", waited);
    assert!(cluster.total_writes() == 0, "expected no engine writes, got {}", cluster.total_writes());
    Ok(())
}

#[tokio::test]
async fn waiting_request_proceeds_once_a_replica_starts() -> Result<()> {
    let cluster = TestCluster::start_with_routing(2, vec![fixtures::shard_copies(0, &[ShardState::Initializing, ShardState::Unassigned])]).await?;
    let request = index_request("doc-1").with_timeout(Duration::from_secs(10));

    let start_replica = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cluster.reroute(vec![fixtures::shard_copies(0, &[ShardState::Active, ShardState::Unassigned])])
    };
    let (res, rerouted) = tokio::join!(cluster.coordinator(0).execute(request), start_replica);
    rerouted?;

    let response = res.context("expected request to proceed once the replica started")?;
    assert!(response.replicas.successful == 1, "expected the started replica to apply the write, got {:?}", response.replicas);
    let stored = stored_version(cluster.engine(1, 0)?.as_ref(), "doc-1")?;
    assert!(stored == Some(1), "expected version 1 on the replica, got {:?}", stored);
    Ok(())
}

#[tokio::test]
async fn initializing_replicas_receive_writes() -> Result<()> {
    let cluster = TestCluster::start_with_routing(2, vec![fixtures::shard_copies(0, &[ShardState::Initializing])]).await?;

    let response = cluster
        .coordinator(0)
        .execute(index_request("doc-1").with_consistency(WriteConsistencyLevel::One))
        .await?;

    assert!(response.replicas.total == 1, "expected the initializing replica to be targeted, got {:?}", response.replicas);
    let stored = stored_version(cluster.engine(1, 0)?.as_ref(), "doc-1")?;
    assert!(stored == Some(1), "expected version 1 on the initializing replica, got {:?}", stored);
    Ok(())
}

#[tokio::test]
async fn disabled_consistency_check_only_needs_the_primary() -> Result<()> {
    let cluster = TestCluster::start_with_routing(1, vec![fixtures::shard_copies(0, &[ShardState::Unassigned, ShardState::Unassigned])]).await?;

    let response = cluster
        .coordinator(0)
        .execute(
            index_request("doc-1")
                .with_consistency(WriteConsistencyLevel::All)
                .without_write_consistency_check()
                .with_timeout(Duration::from_millis(100)),
        )
        .await?;

    assert!(response.replicas.total == 0, "expected no replica targets, got {:?}", response.replicas);
    assert!(cluster.total_writes() == 1, "expected one primary write, got {}", cluster.total_writes());
    Ok(())
}

#[tokio::test]
async fn bulk_item_failures_stay_in_their_slot() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.engine(0, 0)?.fail_ids_with_prefix("bad");
    let bulk = BulkShardRequest::new(vec![
        BulkItemRequest::new(10, fixtures::index_op("a")),
        BulkItemRequest::new(11, fixtures::index_op("bad-1")),
        BulkItemRequest::new(12, fixtures::create_op("c")),
    ]);

    let response = cluster.coordinator(0).execute(ReplicationRequest::bulk(TEST_INDEX, 0, bulk)).await?;

    let items = response.bulk_items().context("expected bulk response")?;
    let ids: Vec<u32> = items.iter().map(|item| item.item_id).collect();
    assert!(ids == vec![10, 11, 12], "expected items in request order, got {:?}", ids);
    assert!(items[0].version() == Some(1) && items[2].version() == Some(1), "expected items 1 and 3 to succeed, got {:?}", items);
    let message = items[1].failure_message().unwrap_or_default();
    assert!(message.contains("injected failure"), "expected item 2 to carry its failure, got {:?}", items[1]);

    let replica = cluster.engine(1, 0)?;
    assert!(replica.writes() == 2, "expected only applied items to be replayed, got {} writes", replica.writes());
    assert!(stored_version(replica.as_ref(), "bad-1")?.is_none(), "expected failed item to be absent on the replica");
    assert!(stored_version(replica.as_ref(), "c")? == Some(1), "expected item 3 on the replica");
    assert!(cluster.reporter.failures().is_empty(), "expected no shard failures, got {:?}", cluster.reporter.failures());
    Ok(())
}

#[tokio::test]
async fn replica_failures_are_reported_but_not_returned() -> Result<()> {
    let cluster = TestCluster::start(3, 1, 2).await?;
    cluster.engine(2, 0)?.fail_all();

    let response = cluster.coordinator(0).execute(index_request("doc-1")).await?;

    assert!(response.replicas.successful == 1, "expected 1 successful replica, got {:?}", response.replicas);
    assert!(response.replicas.failed == 1, "expected 1 failed replica, got {:?}", response.replicas);
    let failures = cluster.reporter.failures();
    assert!(failures.len() == 1, "expected exactly one shard failure, got {:?}", failures);
    assert!(failures[0].node_id == fixtures::node_name(2), "expected failure on node-2, got {:?}", failures[0]);
    assert!(failures[0].shard_id == ShardId::new(TEST_INDEX, 0), "expected failure of shard 0, got {:?}", failures[0]);
    Ok(())
}

#[tokio::test]
async fn missing_replica_copies_are_not_reported() -> Result<()> {
    let cluster = TestCluster::start(3, 1, 2).await?;
    cluster.nodes[1].indices.remove(&ShardId::new(TEST_INDEX, 0));
    cluster.transport.disconnect(&fixtures::node_name(2));

    let response = cluster.coordinator(0).execute(index_request("doc-1")).await?;

    assert!(response.replicas.failed == 2, "expected both replicas to fail, got {:?}", response.replicas);
    assert!(cluster.reporter.failures().is_empty(), "expected ignorable failures not to be reported, got {:?}", cluster.reporter.failures());
    Ok(())
}

#[tokio::test]
async fn async_replication_returns_before_replicas_finish() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.engine(1, 0)?.fail_all();

    let response = cluster
        .coordinator(0)
        .execute(index_request("doc-1").with_replication_type(ReplicationType::Async))
        .await?;

    assert!(response.replicas.pending == 1, "expected 1 pending replica, got {:?}", response.replicas);
    assert!(response.replicas.failed == 0, "expected no awaited failures, got {:?}", response.replicas);
    let failures = cluster.reporter.wait_for(1).await;
    assert!(failures.len() == 1, "expected the replica failure to be reported, got {:?}", failures);
    Ok(())
}

#[tokio::test]
async fn requests_are_forwarded_to_the_primary_node() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;

    let response = cluster.coordinator(1).execute(index_request("doc-1")).await?;

    assert!(response.shard_id == ShardId::new(TEST_INDEX, 0), "expected shard 0, got {}", response.shard_id);
    assert!(response.replicas.successful == 1, "expected the replica to apply the write, got {:?}", response.replicas);
    let primary = cluster.engine(0, 0)?;
    assert!(stored_version(primary.as_ref(), "doc-1")? == Some(1), "expected the primary to hold the doc");
    assert!(primary.writes() == 1, "expected one primary write, got {}", primary.writes());
    Ok(())
}

#[tokio::test]
async fn forwarded_primary_failures_keep_their_type() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.engine(0, 0)?.fail_all();

    let res = cluster.coordinator(1).execute(index_request("doc-1")).await;

    let err = match res {
        Err(ReplicationError::PrimaryExecution(err)) => err,
        other => anyhow::bail!("expected primary execution error, got {:?}", other),
    };
    assert!(
        matches!(&err.source, EngineError::Storage(msg) if msg.contains("injected failure")),
        "expected the injected storage failure, got {:?}",
        err.source
    );
    assert!(cluster.engine(1, 0)?.writes() == 0, "expected no replica writes after a primary failure");
    Ok(())
}

#[tokio::test]
async fn version_conflicts_fail_the_request() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.coordinator(0).execute(index_request("doc-1")).await?;

    let mut conflicting = fixtures::index_op("doc-1");
    if let crate::models::ItemOperation::Index(req) = &mut conflicting {
        req.version = 7;
    }
    let res = cluster.coordinator(0).execute(ReplicationRequest::new(TEST_INDEX, 0, conflicting.into())).await;

    assert!(
        matches!(&res, Err(ReplicationError::PrimaryExecution(err)) if matches!(err.source, EngineError::VersionConflict { current: 1, provided: 7, .. })),
        "expected version conflict, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn forwarded_requests_are_not_forwarded_again() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    let node_id = fixtures::node_name(1);

    let frame = cluster.coordinator(1).handle_primary_frame(codec::encode_request(&index_request("doc-1"))).await;
    let res = codec::decode_response(frame, &node_id);

    assert!(
        matches!(&res, Err(ReplicationError::Routing(RoutingError::PrimaryNotLocal { node_id: node, .. })) if node == &node_id),
        "expected primary not local, got {:?}",
        res
    );
    assert!(cluster.total_writes() == 0, "expected no engine writes, got {}", cluster.total_writes());
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_rejected() -> Result<()> {
    let cluster = TestCluster::start(1, 1, 0).await?;
    let node_id = fixtures::node_name(0);

    let frame = cluster.coordinator(0).handle_primary_frame(bytes::Bytes::from_static(&[4, 0])).await;
    let res = codec::decode_response(frame, &node_id);

    assert!(
        matches!(&res, Err(ReplicationError::Transport(TransportError::Remote { .. }))),
        "expected remote failure for a malformed frame, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn refresh_applies_on_every_copy() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;

    cluster.coordinator(0).execute(index_request("doc-1").with_refresh(true)).await?;
    cluster.coordinator(0).execute(index_request("doc-2")).await?;

    for node in 0..2 {
        let refreshes = cluster.engine(node, 0)?.refreshes();
        assert!(refreshes == 1, "expected 1 refresh on node {}, got {}", node, refreshes);
    }
    Ok(())
}

#[tokio::test]
async fn failed_refresh_keeps_applied_writes_and_replicates() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.engine(0, 0)?.fail_refresh();
    let bulk = BulkShardRequest::new(vec![
        BulkItemRequest::new(0, fixtures::index_op("a")),
        BulkItemRequest::new(1, fixtures::index_op("b")),
    ]);

    let response = cluster
        .coordinator(0)
        .execute(ReplicationRequest::bulk(TEST_INDEX, 0, bulk).with_refresh(true))
        .await
        .context("expected a failed refresh to leave the write successful")?;

    let items = response.bulk_items().context("expected bulk response")?;
    assert!(items.len() == 2, "expected 2 item responses, got {:?}", items);
    assert!(items.iter().all(|item| item.version() == Some(1)), "expected every item to succeed, got {:?}", items);
    assert!(response.replicas.successful == 1, "expected the replica to receive the writes, got {:?}", response.replicas);
    for node in 0..2 {
        let engine = cluster.engine(node, 0)?;
        for id in ["a", "b"] {
            let stored = stored_version(engine.as_ref(), id)?;
            assert!(stored == Some(1), "expected {} at version 1 on node {}, got {:?}", id, node, stored);
        }
    }
    assert!(cluster.reporter.failures().is_empty(), "expected no shard failures, got {:?}", cluster.reporter.failures());
    Ok(())
}

#[tokio::test]
async fn unbounded_timeouts_do_not_overflow_the_deadline() -> Result<()> {
    let cluster = TestCluster::start(1, 1, 0).await?;

    let response = cluster.coordinator(0).execute(index_request("doc-1").with_timeout(Duration::MAX)).await?;

    let version = match &response.result {
        OperationResult::Index(res) => res.version,
        other => anyhow::bail!("expected index result, got {:?}", other),
    };
    assert!(version == 1, "expected version 1, got {}", version);
    Ok(())
}

#[tokio::test]
async fn deletes_replicate_with_primary_versions() -> Result<()> {
    let cluster = TestCluster::start(2, 1, 1).await?;
    cluster.coordinator(0).execute(index_request("doc-1")).await?;

    let deleted = cluster
        .coordinator(0)
        .execute(ReplicationRequest::new(TEST_INDEX, 0, fixtures::delete_op("doc-1").into()))
        .await?;
    let missing = cluster
        .coordinator(0)
        .execute(ReplicationRequest::new(TEST_INDEX, 0, fixtures::delete_op("doc-2").into()))
        .await?;

    match (&deleted.result, &missing.result) {
        (OperationResult::Delete(deleted), OperationResult::Delete(missing)) => {
            assert!(deleted.found && deleted.version == 2, "expected delete at version 2, got {:?}", deleted);
            assert!(!missing.found, "expected unknown doc not to be found, got {:?}", missing);
        }
        other => anyhow::bail!("expected delete results, got {:?}", other),
    }
    let replica = cluster.engine(1, 0)?;
    assert!(stored_version(replica.as_ref(), "doc-1")?.is_none(), "expected the replica to drop the doc");
    Ok(())
}

#[tokio::test]
async fn bulk_requests_span_shards_on_different_nodes() -> Result<()> {
    let cluster = TestCluster::start(3, 3, 1).await?;
    let operations = (0..30).map(|pos| fixtures::index_op(&format!("doc-{}", pos))).collect();
    let groups = BulkShardRequest::group_by_shard(&cluster.cluster.state(), TEST_INDEX, operations)?;

    let mut applied = 0;
    for (shard, bulk) in groups {
        let len = bulk.len();
        let response = cluster.coordinator(0).execute(ReplicationRequest::bulk(TEST_INDEX, shard, bulk)).await?;
        let items = response.bulk_items().context("expected bulk response")?;
        assert!(items.len() == len, "expected {} item responses on shard {}, got {}", len, shard, items.len());
        assert!(items.iter().all(|item| !item.is_failed()), "expected every item to succeed on shard {}", shard);
        applied += len;
    }

    assert!(applied == 30, "expected 30 applied items, got {}", applied);
    assert!(cluster.total_writes() == 60, "expected every item on a primary and a replica, got {} writes", cluster.total_writes());
    Ok(())
}
