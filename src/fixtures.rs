use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing_subscriber::prelude::*;

use crate::cluster::{
    ClusterService, ClusterState, IndexRoutingTable, IndexShardRoutingTable, NodeId, ShardFailure, ShardId, ShardRole, ShardRouting, ShardState, ShardStateReporter,
};
use crate::config::Config;
use crate::database::Database;
use crate::engine::{DeleteOp, Engine, IndexOp, IndicesService, SledEngine};
use crate::error::EngineError;
use crate::models::{DeleteRequest, IndexRequest, ItemOperation, StoredDocument};
use crate::replication::ReplicationCoordinator;
use crate::transport::LocalTransport;

pub const TEST_INDEX: &str = "test-index";
pub const TEST_DOC_TYPE: &str = "doc";

/// Install a tracing subscriber for tests, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_test_writer())
        .try_init();
}

/// A shard state reporter which records every reported failure.
#[derive(Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<ShardFailure>>,
}

impl RecordingReporter {
    pub fn failures(&self) -> Vec<ShardFailure> {
        self.failures.lock().map(|failures| failures.clone()).unwrap_or_default()
    }

    /// Wait for at least `count` failures to be reported, up to a second.
    pub async fn wait_for(&self, count: usize) -> Vec<ShardFailure> {
        for _ in 0..100 {
            let failures = self.failures();
            if failures.len() >= count {
                return failures;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.failures()
    }
}

impl ShardStateReporter for RecordingReporter {
    fn report_failure(&self, shard_id: &ShardId, node_id: &NodeId, reason: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(ShardFailure {
                shard_id: shard_id.clone(),
                node_id: node_id.clone(),
                reason: reason.to_string(),
            });
        }
    }
}

/// A sled engine which counts its calls, and which can be told to fail operations.
pub struct InstrumentedEngine {
    inner: SledEngine,
    writes: AtomicUsize,
    refreshes: AtomicUsize,
    /// Write operations on documents whose ID starts with this prefix fail.
    fail_prefix: Mutex<Option<String>>,
    /// Every write operation fails.
    fail_all: Mutex<bool>,
    fail_refresh: Mutex<bool>,
}

impl InstrumentedEngine {
    pub fn new(inner: SledEngine) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fail_prefix: Mutex::new(None),
            fail_all: Mutex::new(false),
            fail_refresh: Mutex::new(false),
        }
    }

    /// The number of write operations which reached this engine.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Fail writes to documents whose ID starts with the given prefix.
    pub fn fail_ids_with_prefix(&self, prefix: &str) {
        if let Ok(mut fail_prefix) = self.fail_prefix.lock() {
            *fail_prefix = Some(prefix.to_string());
        }
    }

    /// Fail every write.
    pub fn fail_all(&self) {
        if let Ok(mut fail_all) = self.fail_all.lock() {
            *fail_all = true;
        }
    }

    /// Fail every refresh, while writes keep succeeding.
    pub fn fail_refresh(&self) {
        if let Ok(mut fail_refresh) = self.fail_refresh.lock() {
            *fail_refresh = true;
        }
    }

    fn check_write(&self, id: &str) -> Result<(), EngineError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let fail_all = self.fail_all.lock().map(|fail_all| *fail_all).unwrap_or(false);
        let fail_prefix = self
            .fail_prefix
            .lock()
            .map(|prefix| prefix.as_ref().map(|prefix| id.starts_with(prefix.as_str())).unwrap_or(false))
            .unwrap_or(false);
        if fail_all || fail_prefix {
            return Err(EngineError::Storage(format!("injected failure for document [{}]", id)));
        }
        Ok(())
    }
}

impl Engine for InstrumentedEngine {
    fn shard_id(&self) -> &ShardId {
        self.inner.shard_id()
    }

    fn index(&self, op: &mut IndexOp) -> Result<(), EngineError> {
        self.check_write(&op.id)?;
        self.inner.index(op)
    }

    fn create(&self, op: &mut IndexOp) -> Result<(), EngineError> {
        self.check_write(&op.id)?;
        self.inner.create(op)
    }

    fn delete(&self, op: &mut DeleteOp) -> Result<(), EngineError> {
        self.check_write(&op.id)?;
        self.inner.delete(op)
    }

    fn get(&self, doc_type: &str, id: &str) -> Result<Option<StoredDocument>, EngineError> {
        self.inner.get(doc_type, id)
    }

    fn refresh(&self) -> Result<(), EngineError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.lock().map(|fail| *fail).unwrap_or(false) {
            return Err(EngineError::Storage("flush failed".into()));
        }
        self.inner.refresh()
    }

    fn close(&self) {
        self.inner.close()
    }
}

/// A node of a test cluster.
pub struct TestNode {
    pub node_id: NodeId,
    pub config: Arc<Config>,
    pub db: Database,
    pub indices: IndicesService,
    pub coordinator: ReplicationCoordinator,
}

/// A cluster of nodes connected by a local transport, sharing one cluster service.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub cluster: ClusterService,
    pub transport: LocalTransport,
    pub reporter: Arc<RecordingReporter>,
    engines: HashMap<(NodeId, u32), Arc<InstrumentedEngine>>,
    _tmpdir: tempfile::TempDir,
}

impl TestCluster {
    /// Start a cluster of `nodes` nodes hosting `TEST_INDEX` with the given number of shards,
    /// each with the given number of replicas.
    ///
    /// The primary of shard `s` lives on node `s % nodes`, and its replicas on the nodes which
    /// follow it. Every copy is active.
    pub async fn start(nodes: usize, shards: u32, replicas: usize) -> Result<Self> {
        let routing = (0..shards)
            .map(|shard| {
                let shard_id = ShardId::new(TEST_INDEX, shard);
                let mut copies = vec![ShardRouting::primary(shard_id.clone(), node_name(shard as usize % nodes))];
                for replica in 0..replicas {
                    copies.push(ShardRouting::replica(shard_id.clone(), node_name((shard as usize + 1 + replica) % nodes), ShardState::Active));
                }
                copies
            })
            .collect();
        Self::start_with_routing(nodes, routing).await
    }

    /// Start a cluster of `nodes` nodes hosting `TEST_INDEX` with the given copies per shard.
    ///
    /// An engine is opened on every node which holds an assigned copy.
    pub async fn start_with_routing(nodes: usize, routing: Vec<Vec<ShardRouting>>) -> Result<Self> {
        init_tracing();
        let (config, tmpdir) = Config::new_test()?;
        let index_table = index_table(TEST_INDEX, routing.clone())?;
        let state = (0..nodes)
            .fold(ClusterState::builder(), |builder, node| builder.node(node_name(node)))
            .index(index_table)
            .version(1)
            .build();
        let cluster = ClusterService::new(state);
        let transport = LocalTransport::new();
        let reporter = Arc::new(RecordingReporter::default());

        let mut engines = HashMap::new();
        let mut test_nodes = Vec::with_capacity(nodes);
        for node in 0..nodes {
            let node_id = node_name(node);
            let config = config.for_node(&node_id);
            let db = Database::new(config.clone()).await.context("error opening test node database")?;
            let indices = IndicesService::new();
            for copy in routing.iter().flatten().filter(|copy| copy.assigned() && copy.is_on_node(&node_id)) {
                let tree = db.get_shard_tree(&copy.shard_id).await?;
                let engine = Arc::new(InstrumentedEngine::new(SledEngine::new(copy.shard_id.clone(), tree)));
                indices.insert(engine.clone());
                engines.insert((node_id.clone(), copy.shard_id.id), engine);
            }
            let coordinator = ReplicationCoordinator::new(config.clone(), cluster.clone(), indices.clone(), Arc::new(transport.clone()), reporter.clone());
            transport.register(node_id.clone(), Arc::new(coordinator.clone()));
            test_nodes.push(TestNode {
                node_id,
                config,
                db,
                indices,
                coordinator,
            });
        }

        Ok(Self {
            nodes: test_nodes,
            cluster,
            transport,
            reporter,
            engines,
            _tmpdir: tmpdir,
        })
    }

    /// The coordinator of the given node.
    pub fn coordinator(&self, node: usize) -> &ReplicationCoordinator {
        &self.nodes[node].coordinator
    }

    /// The engine of the given shard on the given node.
    pub fn engine(&self, node: usize, shard: u32) -> Result<Arc<InstrumentedEngine>> {
        self.engines
            .get(&(node_name(node), shard))
            .cloned()
            .with_context(|| format!("no engine for shard {} on node {}", shard, node))
    }

    /// The total number of writes which reached any engine of the cluster.
    pub fn total_writes(&self) -> usize {
        self.engines.values().map(|engine| engine.writes()).sum()
    }

    /// Replace the routing of `TEST_INDEX` with the given copies per shard.
    pub fn reroute(&self, routing: Vec<Vec<ShardRouting>>) -> Result<Arc<ClusterState>> {
        let table = index_table(TEST_INDEX, routing)?;
        Ok(self.cluster.update(|builder| builder.index(table)))
    }
}

/// The name of the test node with the given ordinal.
pub fn node_name(node: usize) -> NodeId {
    format!("node-{}", node)
}

/// Build the routing table of an index from the copies of each of its shards, in shard order.
pub fn index_table(index: &str, shards: Vec<Vec<ShardRouting>>) -> Result<IndexRoutingTable> {
    shards.into_iter().enumerate().try_fold(IndexRoutingTable::new(index), |table, (shard, copies)| -> Result<IndexRoutingTable> {
        let shard_table = IndexShardRoutingTable::new(ShardId::new(index, shard as u32), copies)?;
        Ok(table.with_shard(shard_table)?)
    })
}

/// The copies of one shard: an active primary on the first node, and one replica per given state
/// on the following nodes.
pub fn shard_copies(shard: u32, replica_states: &[ShardState]) -> Vec<ShardRouting> {
    let shard_id = ShardId::new(TEST_INDEX, shard);
    let mut copies = vec![ShardRouting::primary(shard_id.clone(), node_name(0))];
    for (pos, state) in replica_states.iter().enumerate() {
        copies.push(match state {
            ShardState::Unassigned => ShardRouting::unassigned(shard_id.clone(), ShardRole::Replica),
            state => ShardRouting::replica(shard_id.clone(), node_name(pos + 1), *state),
        });
    }
    copies
}

/// A document index operation with a small JSON source.
pub fn index_op(id: &str) -> ItemOperation {
    ItemOperation::Index(IndexRequest {
        doc_type: TEST_DOC_TYPE.into(),
        id: id.into(),
        routing: None,
        source: Bytes::from(format!(r#"{{"id":"{}","value":{}}}"#, id, id.len())),
        version: 0,
    })
}

/// A document create operation with a small JSON source.
pub fn create_op(id: &str) -> ItemOperation {
    match index_op(id) {
        ItemOperation::Index(req) => ItemOperation::Create(req),
        other => other,
    }
}

/// A document delete operation.
pub fn delete_op(id: &str) -> ItemOperation {
    ItemOperation::Delete(DeleteRequest {
        doc_type: TEST_DOC_TYPE.into(),
        id: id.into(),
        routing: None,
        version: 0,
    })
}
