//! Database management.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sled::{Config as SledConfig, Db, IVec};

use crate::cluster::ShardId;
use crate::config::Config;
use crate::error::{ShutdownError, ShutdownResult};

pub type Tree = sled::Tree;

/// The default path to use for data storage.
pub const DEFAULT_DATA_PATH: &str = "/usr/local/hadron-shard/data";
/// The DB tree prefix used for shard data.
const TREE_SHARD_PREFIX: &str = "shards";

/// The default path to use for data storage.
pub fn default_data_path() -> String {
    DEFAULT_DATA_PATH.to_string()
}

/// An abstraction over the node's database.
///
/// Every shard copy hosted by the node lives in its own tree.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    /// The underlying DB handle.
    db: Db,
}

impl Database {
    /// Open the database for usage.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        // Determine the database path, and ensure it exists.
        let dbpath = PathBuf::from(&config.storage_data_path).join(config.node_id.as_str());
        tokio::fs::create_dir_all(&dbpath)
            .await
            .context("error creating dir for hadron shard database")?;

        Self::spawn_blocking(move || -> Result<Self> {
            let db = SledConfig::new()
                .path(dbpath)
                .mode(sled::Mode::HighThroughput)
                .open()
                .context("error opening sled database")?;
            let inner = Arc::new(DatabaseInner { db });
            Ok(Self { inner })
        })
        .await?
    }

    /// Spawn a blocking database-related function, returning a ShutdownError if anything goes
    /// wrong related to spawning & joining.
    #[tracing::instrument(level = "trace", skip(f), err)]
    pub async fn spawn_blocking<F, R>(f: F) -> ShutdownResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| ShutdownError::from(anyhow::Error::from(err)))
    }

    /// Get a handle to the DB tree of a shard copy.
    pub async fn get_shard_tree(&self, shard_id: &ShardId) -> ShutdownResult<Tree> {
        let name = format!("{}/{}/{}", TREE_SHARD_PREFIX, shard_id.index, shard_id.id);
        let (db, ivname) = (self.inner.db.clone(), IVec::from(name.as_str()));
        let tree = Self::spawn_blocking(move || -> Result<Tree> { Ok(db.open_tree(ivname)?) })
            .await
            .and_then(|res| res.map_err(|err| ShutdownError(anyhow!("could not open DB tree {} {}", &name, err))))?;
        Ok(tree)
    }
}
