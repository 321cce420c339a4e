//! Write consistency.
//!
//! Before a write is attempted, enough copies of the target shard must be active to satisfy the
//! request's consistency level. When they are not, the coordinator waits for the cluster to
//! change, backing off between checks, until the request's deadline.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::time::Instant;

use crate::cluster::{ClusterStateRx, ShardsIterator};

/// The minimum number of active copies required before a write is attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteConsistencyLevel {
    One,
    Quorum,
    All,
}

impl WriteConsistencyLevel {
    /// The number of active copies required out of `total` configured copies.
    pub fn required_copies(&self, total: usize) -> usize {
        match self {
            Self::One => 1,
            Self::Quorum => total / 2 + 1,
            Self::All => total,
        }
    }

    /// The wire ID of this level.
    pub fn id(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Quorum => 2,
            Self::All => 3,
        }
    }

    /// Parse a level from its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::One),
            2 => Some(Self::Quorum),
            3 => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for WriteConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("ONE"),
            Self::Quorum => f.write_str("QUORUM"),
            Self::All => f.write_str("ALL"),
        }
    }
}

/// The details of an unmet consistency requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unmet {
    pub required: usize,
    pub active: usize,
    pub primary_active: bool,
}

/// Check that the given shard copies satisfy the given consistency level.
///
/// The requirement is computed against every configured copy of the shard, including unassigned
/// ones. The primary must itself be active, as it is where the write executes.
pub fn check(shards: &ShardsIterator, level: WriteConsistencyLevel) -> Result<(), Unmet> {
    let required = level.required_copies(shards.size());
    let active = shards.size_active();
    let primary_active = shards.primary().map(|primary| primary.active()).unwrap_or(false);
    if !primary_active || active < required {
        return Err(Unmet { required, active, primary_active });
    }
    Ok(())
}

/// A doubling backoff with jitter, used between consistency checks.
#[derive(Clone, Debug)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a new instance starting at `initial` and never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.max(Duration::from_millis(1)),
            max: max.max(initial),
        }
    }

    /// The next delay to wait.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        let jitter_ceil = (u64::try_from(base.as_millis()).unwrap_or(u64::MAX) / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ceil));
        (base + jitter).min(self.max)
    }
}

/// The longest a request deadline may be pushed into the future.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Compute the deadline of a request started at `started` with the given timeout.
///
/// Timeouts too large to be represented as an instant are capped at `MAX_WAIT`.
pub fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout.min(MAX_WAIT))
        .or_else(|| started.checked_add(MAX_WAIT))
        .unwrap_or(started)
}

/// Wait for a new cluster state, or for the next backoff delay, whichever comes first.
///
/// Never waits past `deadline`. If the cluster state channel is closed, waits out the delay.
pub async fn wait_for_change(changes: &mut ClusterStateRx, backoff: &mut Backoff, deadline: Instant) {
    let now = Instant::now();
    if now >= deadline {
        return;
    }
    let delay = backoff.next_delay().min(deadline - now);
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let channel_open = tokio::select! {
        res = changes.changed() => res.is_ok(),
        _ = &mut sleep => true,
    };
    if !channel_open {
        sleep.await;
    }
}
