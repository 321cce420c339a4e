//! The Hadron shard replication write path.
//!
//! Mutating operations against an index are resolved to the copies of one of the index's shards,
//! executed on the primary copy, and then replicated to the replica copies. The caller receives
//! a single response once the primary's outcome is known.
//!
//! The main entry point is `ReplicationCoordinator::execute`.

pub mod cluster;
pub mod codec;
pub mod config;
pub mod consistency;
pub mod database;
pub mod engine;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod models;
pub mod replication;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::{ReplicationError, ReplicationResult};
pub use models::{ReplicationRequest, ReplicationResponse};
pub use replication::ReplicationCoordinator;
