//! Shard storage engines.
//!
//! The replication protocol only drives engines, it never looks inside them. Every engine call
//! is blocking, and is only ever made from a blocking worker.

mod sled;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::cluster::ShardId;
use crate::database::Database;
use crate::error::{EngineError, ShutdownResult};
use crate::models::StoredDocument;

pub use self::sled::SledEngine;

/// A map of the engines of all shard copies hosted by this node.
pub type EnginesMap = Arc<ArcSwap<HashMap<ShardId, Arc<dyn Engine>>>>;

/// The copy on which an operation executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The operation executes on the primary, which checks and assigns versions.
    Primary,
    /// The operation is replayed on a replica, which applies the primary's versions.
    Replica,
}

/// A prepared index or create operation.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexOp {
    pub doc_type: String,
    pub id: String,
    pub source: Bytes,
    /// On input, the expected version on a primary or the version to apply on a replica. Once
    /// executed, the version of the document.
    pub version: u64,
    pub origin: Origin,
    /// Fail if the document already exists.
    pub create: bool,
    /// Set once executed, true if the document did not exist.
    pub created: bool,
}

/// A prepared delete operation.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteOp {
    pub doc_type: String,
    pub id: String,
    /// Same semantics as `IndexOp::version`.
    pub version: u64,
    pub origin: Origin,
    /// Set once executed, true if the document existed.
    pub found: bool,
}

/// The storage engine of a single shard copy.
pub trait Engine: Send + Sync + 'static {
    /// The shard this engine stores.
    fn shard_id(&self) -> &ShardId;

    fn prepare_index(&self, doc_type: &str, id: &str, source: Bytes, version: u64, origin: Origin) -> IndexOp {
        IndexOp {
            doc_type: doc_type.into(),
            id: id.into(),
            source,
            version,
            origin,
            create: false,
            created: false,
        }
    }

    fn prepare_create(&self, doc_type: &str, id: &str, source: Bytes, version: u64, origin: Origin) -> IndexOp {
        IndexOp {
            create: true,
            ..self.prepare_index(doc_type, id, source, version, origin)
        }
    }

    fn prepare_delete(&self, doc_type: &str, id: &str, version: u64, origin: Origin) -> DeleteOp {
        DeleteOp {
            doc_type: doc_type.into(),
            id: id.into(),
            version,
            origin,
            found: false,
        }
    }

    /// Index a document, creating or replacing it.
    fn index(&self, op: &mut IndexOp) -> Result<(), EngineError>;

    /// Create a document, failing if it already exists.
    fn create(&self, op: &mut IndexOp) -> Result<(), EngineError>;

    /// Delete a document.
    fn delete(&self, op: &mut DeleteOp) -> Result<(), EngineError>;

    /// Get the live version of a document.
    fn get(&self, doc_type: &str, id: &str) -> Result<Option<StoredDocument>, EngineError>;

    /// Make all applied operations durable.
    fn refresh(&self) -> Result<(), EngineError>;

    /// Close the engine. Any later call fails with `EngineError::Closed`.
    fn close(&self);
}

/// The shard copies hosted by this node, along with their engines.
#[derive(Clone)]
pub struct IndicesService {
    engines: EnginesMap,
}

impl Default for IndicesService {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicesService {
    /// Create a new instance hosting no shards.
    pub fn new() -> Self {
        Self {
            engines: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Register the engine of a shard copy, replacing any previous engine of the same shard.
    pub fn insert(&self, engine: Arc<dyn Engine>) {
        let shard_id = engine.shard_id().clone();
        tracing::debug!(%shard_id, "adding shard engine");
        let orig = self.engines.load_full();
        let mut updated = orig.as_ref().clone();
        if let Some(old) = updated.insert(shard_id, engine) {
            old.close();
        }
        self.engines.store(Arc::new(updated));
    }

    /// Open a sled engine for the given shard in the given database, and register it.
    pub async fn open_shard(&self, db: &Database, shard_id: ShardId) -> ShutdownResult<Arc<dyn Engine>> {
        let tree = db.get_shard_tree(&shard_id).await?;
        let engine: Arc<dyn Engine> = Arc::new(SledEngine::new(shard_id, tree));
        self.insert(engine.clone());
        Ok(engine)
    }

    /// Close and remove the engine of a shard copy.
    pub fn remove(&self, shard_id: &ShardId) -> Option<Arc<dyn Engine>> {
        let orig = self.engines.load_full();
        let mut updated = orig.as_ref().clone();
        let old = updated.remove(shard_id);
        if let Some(old) = &old {
            tracing::debug!(%shard_id, "removing shard engine");
            old.close();
        }
        self.engines.store(Arc::new(updated));
        old
    }

    pub fn has_shard(&self, shard_id: &ShardId) -> bool {
        self.engines.load().contains_key(shard_id)
    }

    /// Get the engine of a shard copy hosted by this node.
    pub fn shard_safe(&self, shard_id: &ShardId) -> Result<Arc<dyn Engine>, EngineError> {
        self.engines
            .load()
            .get(shard_id)
            .cloned()
            .ok_or_else(|| EngineError::ShardMissing { shard_id: shard_id.clone() })
    }
}
