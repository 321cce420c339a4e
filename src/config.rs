//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cluster::NodeId;
use crate::consistency::WriteConsistencyLevel;
use crate::models::ReplicationType;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The ID of this node within the cluster.
    ///
    /// This is compared against the node IDs of the routing table in order to decide whether a
    /// shard copy is local to this node.
    pub node_id: NodeId,

    /// The path to the database on disk.
    #[serde(default = "crate::database::default_data_path")]
    pub storage_data_path: String,

    /// The max number of shard operations which may execute on blocking workers at once.
    #[serde(default = "Config::default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// The timeout applied to requests which do not specify their own, in milliseconds.
    #[serde(default = "Config::default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// The initial delay between write consistency checks, in milliseconds.
    #[serde(default = "Config::default_consistency_poll_interval_ms")]
    pub consistency_poll_interval_ms: u64,
    /// The upper bound of the delay between write consistency checks, in milliseconds.
    #[serde(default = "Config::default_consistency_max_backoff_ms")]
    pub consistency_max_backoff_ms: u64,
    /// The write consistency level used for requests which do not specify their own.
    #[serde(default = "Config::default_consistency")]
    pub default_consistency: WriteConsistencyLevel,
    /// The replication type used for requests which do not specify their own.
    #[serde(default = "Config::default_replication")]
    pub default_replication: ReplicationType,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config for values which would leave the node unable to make progress.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            anyhow::bail!("NODE_ID must not be empty");
        }
        if self.worker_pool_size == 0 {
            anyhow::bail!("WORKER_POOL_SIZE must be greater than 0");
        }
        if self.consistency_poll_interval_ms == 0 || self.consistency_max_backoff_ms < self.consistency_poll_interval_ms {
            anyhow::bail!("CONSISTENCY_MAX_BACKOFF_MS must be >= CONSISTENCY_POLL_INTERVAL_MS, which must be > 0");
        }
        Ok(())
    }

    /// The timeout applied to requests which do not specify their own.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// The initial delay between write consistency checks.
    pub fn consistency_poll_interval(&self) -> Duration {
        Duration::from_millis(self.consistency_poll_interval_ms)
    }

    /// The upper bound of the delay between write consistency checks.
    pub fn consistency_max_backoff(&self) -> Duration {
        Duration::from_millis(self.consistency_max_backoff_ms)
    }

    fn default_worker_pool_size() -> usize {
        8
    }

    fn default_timeout_ms() -> u64 {
        60_000
    }

    fn default_consistency_poll_interval_ms() -> u64 {
        50
    }

    fn default_consistency_max_backoff_ms() -> u64 {
        1_000
    }

    fn default_consistency() -> WriteConsistencyLevel {
        WriteConsistencyLevel::Quorum
    }

    fn default_replication() -> ReplicationType {
        ReplicationType::Async
    }
}

#[cfg(test)]
impl Config {
    /// Create a config for testing, rooted in a new temporary directory.
    pub fn new_test() -> Result<(std::sync::Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir in /tmp")?;
        Ok((
            std::sync::Arc::new(Self {
                rust_log: "error".into(),
                node_id: "node-0".into(),
                storage_data_path: tmpdir.path().to_string_lossy().to_string(),
                worker_pool_size: 4,
                default_timeout_ms: 1_000,
                consistency_poll_interval_ms: 10,
                consistency_max_backoff_ms: 50,
                default_consistency: WriteConsistencyLevel::Quorum,
                default_replication: ReplicationType::Sync,
            }),
            tmpdir,
        ))
    }

    /// Clone this config for another node of a test cluster.
    pub fn for_node(&self, node_id: &str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            node_id: node_id.into(),
            ..self.clone()
        })
    }
}
