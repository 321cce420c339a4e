//! Shard replication.
//!
//! A replicated write moves through the following phases:
//!
//! ```text
//! RECEIVED -> BLOCK_CHECKED -> ROUTED -> CONSISTENCY_OK -> PRIMARY_EXECUTING -> REPLICATING -> DONE
//! ```
//!
//! Any phase before `DONE` may end in `FAILED`. A replica failure never fails the write.

mod coordinator;
#[cfg(test)]
mod coordinator_test;
mod pool;
mod primary;
mod replica;

pub use coordinator::{ReplicationCoordinator, ReplicationPhase};
pub use pool::WorkerPool;
pub use primary::{shard_operation_on_primary, PrimaryOutcome};
pub use replica::shard_operation_on_replica;

pub(crate) const METRIC_PRIMARY_OPERATIONS: &str = "hadron_shard_primary_operations";
pub(crate) const METRIC_PRIMARY_FAILURES: &str = "hadron_shard_primary_failures";
pub(crate) const METRIC_REPLICA_FAILURES: &str = "hadron_shard_replica_failures";
pub(crate) const METRIC_BLOCKED_REQUESTS: &str = "hadron_shard_blocked_requests";
pub(crate) const METRIC_CONSISTENCY_TIMEOUTS: &str = "hadron_shard_consistency_timeouts";
pub(crate) const METRIC_BULK_ITEM_FAILURES: &str = "hadron_shard_bulk_item_failures";
pub(crate) const METRIC_REFRESH_FAILURES: &str = "hadron_shard_refresh_failures";

/// Refresh a shard copy after its writes have been applied.
///
/// The writes are already durable at this point, so a failed refresh is logged and counted but
/// does not fail the operation.
pub(crate) fn refresh_after_writes(engine: &dyn crate::engine::Engine) {
    if let Err(err) = engine.refresh() {
        tracing::warn!(shard = %engine.shard_id(), error = %err, "failed to refresh shard after write");
        metrics::increment_counter!(METRIC_REFRESH_FAILURES);
    }
}
