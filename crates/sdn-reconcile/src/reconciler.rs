//! Base Reconciler trait.

use crate::TaskResult;
use async_trait::async_trait;
use std::time::Duration;

/// When the scheduler should run a key again after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only when the record changes again.
    Never,
    /// At the scheduler's periodic resync interval.
    Resync,
    /// After a fixed delay, replacing any pending timer for the key.
    After(Duration),
}

/// One convergence step for a single resource key.
///
/// Each controller implements this trait and is driven by a
/// [`Scheduler`](crate::Scheduler). The scheduler guarantees that a key is
/// never reconciled twice concurrently, while different keys run in
/// parallel.
///
/// # Contract
///
/// 1. Read the newest desired state for `key` (it may have been deleted)
/// 2. Read the last observed state
/// 3. Act on the difference only
/// 4. Return how soon the key needs another look
///
/// Passes must be idempotent: running a converged key again performs no
/// device mutation. A newer desired-state write simply causes another pass;
/// there is no explicit cancellation of the previous target.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Returns the name of this reconciler (for logging and metrics).
    fn name(&self) -> &str;

    /// Runs one pass for `key`.
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue>;

    /// Called after the record behind `key` was deleted and its final pass ran.
    fn on_deleted(&self, _key: &str) {
        // Default: no-op
    }
}
