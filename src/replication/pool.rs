use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Semaphore;

use crate::database::Database;
use crate::error::{ShutdownError, ShutdownResult};
use crate::models::ReplicationRequest;

/// A bounded pool of blocking workers on which shard operations execute.
///
/// Handing a request to this pool is the only point at which a request leaves the task which
/// received it, and so it is where requests are prepared for dispatch.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a new instance allowing `size` concurrent workers.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// The number of workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Execute the given function against the given request on a blocking worker.
    ///
    /// The request is prepared for dispatch before it is moved to the worker.
    pub async fn fork<F, R>(&self, request: ReplicationRequest, f: F) -> ShutdownResult<R>
    where
        F: FnOnce(ReplicationRequest) -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("worker pool closed")
            .map_err(ShutdownError::from)?;
        let request = request.prepare_for_dispatch();
        Database::spawn_blocking(move || {
            let _permit = permit;
            f(request)
        })
        .await
    }
}
