use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;

use crate::cluster::ShardId;
use crate::database::Tree;
use crate::engine::{DeleteOp, Engine, IndexOp, Origin};
use crate::error::{EngineError, ERR_DB_FLUSH};
use crate::models::StoredDocument;
use crate::utils;

/// The key prefix of document records.
const PREFIX_DOC: &[u8; 1] = b"d";

/// A shard engine backed by a sled tree.
///
/// Deleted documents leave a tombstone behind, so that their version keeps increasing if they
/// are indexed again and so that a replica never resurrects a document from a stale write.
pub struct SledEngine {
    shard_id: ShardId,
    tree: Tree,
    /// Serializes the read-check-write cycle of versioned writes.
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl SledEngine {
    /// Create a new instance.
    pub fn new(shard_id: ShardId, tree: Tree) -> Self {
        Self {
            shard_id,
            tree,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed { shard_id: self.shard_id.clone() });
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, EngineError> {
        self.ensure_open()?;
        self.write_lock
            .lock()
            .map_err(|_| EngineError::Storage(format!("write lock of shard {} poisoned", self.shard_id)))
    }

    /// Load the record of a document, tombstones included.
    fn load(&self, key: &[u8]) -> Result<Option<StoredDocument>, EngineError> {
        let raw = self
            .tree
            .get(key)
            .context("error fetching document from storage")
            .map_err(EngineError::storage)?;
        raw.map(|raw| utils::decode_model::<StoredDocument>(&raw).map_err(EngineError::storage))
            .transpose()
    }

    fn store(&self, key: &[u8], doc: &StoredDocument) -> Result<(), EngineError> {
        let data = utils::encode_model(doc).map_err(EngineError::storage)?;
        self.tree
            .insert(key, data)
            .context("error writing document to storage")
            .map_err(EngineError::storage)?;
        Ok(())
    }

    fn write_index(&self, op: &mut IndexOp) -> Result<(), EngineError> {
        let _guard = self.lock()?;
        let key = utils::encode_doc_key(PREFIX_DOC, &op.doc_type, &op.id);
        let current = self.load(&key)?;
        let current_version = current.as_ref().map(|doc| doc.version).unwrap_or(0);
        let live = current.as_ref().filter(|doc| !doc.deleted).is_some();

        match op.origin {
            Origin::Primary => {
                if op.create && live {
                    return Err(EngineError::DocumentAlreadyExists {
                        doc_type: op.doc_type.clone(),
                        id: op.id.clone(),
                    });
                }
                if op.version != 0 && op.version != current_version {
                    return Err(EngineError::VersionConflict {
                        doc_type: op.doc_type.clone(),
                        id: op.id.clone(),
                        current: current_version,
                        provided: op.version,
                    });
                }
                op.version = current_version + 1;
            }
            Origin::Replica => {
                if current.is_some() && current_version >= op.version {
                    tracing::trace!(doc_type = %op.doc_type, id = %op.id, current_version, version = op.version, "skipping stale replica index");
                    op.created = false;
                    return Ok(());
                }
            }
        }

        self.store(
            &key,
            &StoredDocument {
                version: op.version,
                source: op.source.to_vec(),
                deleted: false,
            },
        )?;
        op.created = !live;
        Ok(())
    }
}

impl Engine for SledEngine {
    fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    fn index(&self, op: &mut IndexOp) -> Result<(), EngineError> {
        self.write_index(op)
    }

    fn create(&self, op: &mut IndexOp) -> Result<(), EngineError> {
        op.create = true;
        self.write_index(op)
    }

    fn delete(&self, op: &mut DeleteOp) -> Result<(), EngineError> {
        let _guard = self.lock()?;
        let key = utils::encode_doc_key(PREFIX_DOC, &op.doc_type, &op.id);
        let current = self.load(&key)?;
        let current_version = current.as_ref().map(|doc| doc.version).unwrap_or(0);
        op.found = current.as_ref().filter(|doc| !doc.deleted).is_some();

        match op.origin {
            Origin::Primary => {
                if op.version != 0 && op.version != current_version {
                    return Err(EngineError::VersionConflict {
                        doc_type: op.doc_type.clone(),
                        id: op.id.clone(),
                        current: current_version,
                        provided: op.version,
                    });
                }
                if !op.found {
                    op.version = current_version;
                    return Ok(());
                }
                op.version = current_version + 1;
            }
            Origin::Replica => {
                if current_version >= op.version {
                    tracing::trace!(doc_type = %op.doc_type, id = %op.id, current_version, version = op.version, "skipping stale replica delete");
                    return Ok(());
                }
            }
        }

        self.store(
            &key,
            &StoredDocument {
                version: op.version,
                source: Vec::new(),
                deleted: true,
            },
        )
    }

    fn get(&self, doc_type: &str, id: &str) -> Result<Option<StoredDocument>, EngineError> {
        self.ensure_open()?;
        let key = utils::encode_doc_key(PREFIX_DOC, doc_type, id);
        Ok(self.load(&key)?.filter(|doc| !doc.deleted))
    }

    fn refresh(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.tree.flush().context(ERR_DB_FLUSH).map_err(EngineError::storage)?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
