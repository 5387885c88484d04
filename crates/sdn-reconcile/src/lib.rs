//! Store-agnostic reconcile runtime.
//!
//! This crate provides the core traits and types used by every controller in
//! the switch reconciliation engine:
//!
//! - [`StateStore`]: Get/List/Watch/Update-with-version-check over records of one kind
//! - [`MemoryStore`]: in-process [`StateStore`] implementation
//! - [`Reconciler`]: one convergence step for a single resource key
//! - [`Scheduler`]: per-key work queue, timers and dependency waits
//! - [`EventRecorder`]: per-resource event history
//! - [`TaskError`]: classification of reconcile failures
//!
//! # Architecture
//!
//! The runtime follows a level-triggered model:
//!
//! 1. Desired state is written to a [`StateStore`]
//! 2. Store watches enqueue the affected keys on a [`Scheduler`]
//! 3. The scheduler runs the [`Reconciler`] for each key, never twice concurrently
//! 4. The reconciler compares desired and observed state and acts on the difference
//! 5. The outcome decides the next run: a timer, a dependency wait or nothing
//!
//! # Example
//!
//! ```ignore
//! use sdn_reconcile::{Reconciler, Requeue, Scheduler, SchedulerConfig, TaskResult};
//!
//! struct PortReconciler;
//!
//! #[async_trait]
//! impl Reconciler for PortReconciler {
//!     fn name(&self) -> &str { "port" }
//!
//!     async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
//!         // compare desired and observed state for `key`
//!         Ok(Requeue::Resync)
//!     }
//! }
//!
//! let scheduler = Scheduler::new(Arc::new(PortReconciler), SchedulerConfig::default());
//! let handle = scheduler.start();
//! scheduler.enqueue("ethernet1.leaf1");
//! ```

mod events;
mod reconciler;
mod retry;
mod scheduler;
mod store;
mod task;
mod work_queue;

pub use events::{Event, EventRecorder, EventType};
pub use reconciler::{Reconciler, Requeue};
pub use retry::{Constraint, RetryCache};
pub use scheduler::{OutcomeHook, Scheduler, SchedulerConfig};
pub use store::{
    create_if_absent, mutate, MemoryStore, StateStore, StoreError, StoreResult, Versioned,
    WatchEvent,
};
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
pub use work_queue::{Operation, QueueEntry, WorkQueue};
