//! Per-key reconcile scheduler.
//!
//! A [`Scheduler`] owns everything time-related for one reconciler: the work
//! queue, one requeue timer per key, one debounced accelerated re-check per
//! key and the keys parked on a dependency. Nothing here is process-global,
//! so dropping or shutting down a scheduler stops all of its loops.

use crate::{Constraint, QueueEntry, Reconciler, Requeue, RetryCache, TaskStatus, WorkQueue};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback invoked with the reconciler name and outcome of every pass.
pub type OutcomeHook = Arc<dyn Fn(&str, TaskStatus) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Periodic re-run for converged keys and retry interval after failures.
    pub resync_period: Duration,
    /// Delay of the single accelerated re-run requested after a write.
    pub accelerated_delay: Duration,
    /// Passes allowed to run at the same time (different keys only).
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(60),
            accelerated_delay: Duration::from_secs(5),
            max_concurrent: 10,
        }
    }
}

#[derive(Default)]
struct State {
    queue: WorkQueue,
    in_flight: HashSet<String>,
    /// Keys that changed while their pass was running.
    dirty: HashMap<String, Vec<QueueEntry>>,
    timers: HashMap<String, JoinHandle<()>>,
    accelerated: HashMap<String, JoinHandle<()>>,
    waiting: RetryCache<String, ()>,
}

struct Inner {
    reconciler: Arc<dyn Reconciler>,
    config: SchedulerConfig,
    state: Mutex<State>,
    wakeup: Notify,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    hook: Option<OutcomeHook>,
}

/// Drives one [`Reconciler`] over many keys.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<dyn Reconciler>, config: SchedulerConfig) -> Self {
        Self::build(reconciler, config, None)
    }

    pub fn with_outcome_hook(
        reconciler: Arc<dyn Reconciler>,
        config: SchedulerConfig,
        hook: OutcomeHook,
    ) -> Self {
        Self::build(reconciler, config, Some(hook))
    }

    fn build(
        reconciler: Arc<dyn Reconciler>,
        config: SchedulerConfig,
        hook: Option<OutcomeHook>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                reconciler,
                config,
                state: Mutex::new(State::default()),
                wakeup: Notify::new(),
                permits,
                shutdown: CancellationToken::new(),
                hook,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.reconciler.name()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queues a pass for `key`.
    pub fn enqueue(&self, key: &str) {
        self.inner.push(QueueEntry::set(key));
    }

    /// Queues the final pass for a deleted record and drops its timers.
    pub fn forget(&self, key: &str) {
        self.inner.push(QueueEntry::del(key));
    }

    /// Requests one extra pass shortly after a write.
    ///
    /// Debounced: while an accelerated pass is pending for `key`, further
    /// requests are dropped. Returns true if a new timer was armed.
    pub fn accelerate(&self, key: &str) -> bool {
        self.inner.arm_accelerated(key)
    }

    /// Number of queued entries not yet dispatched.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().queue.pending_count()
    }

    /// Wakes every key parked on `constraint`.
    pub fn satisfy(&self, constraint: &Constraint) {
        let ready: Vec<String> = {
            let mut state = self.inner.lock();
            state.waiting.satisfy(constraint);
            state.waiting.drain_ready().into_iter().map(|(k, _)| k).collect()
        };
        for key in ready {
            log::debug!("{}: {} satisfied for {}", self.name(), constraint, key);
            self.enqueue(&key);
        }
    }

    /// Keys currently parked on a dependency.
    pub fn waiting_keys(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut keys: Vec<String> = state.waiting.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn has_timer(&self, key: &str) -> bool {
        self.inner.lock().timers.contains_key(key)
    }

    /// Spawns the dispatch loop.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run().await })
    }

    /// Stops dispatching and cancels every timer.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.lock();
        for (_, handle) in state.timers.drain() {
            handle.abort();
        }
        for (_, handle) in state.accelerated.drain() {
            handle.abort();
        }
        state.queue.clear();
        state.waiting.clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, entry: QueueEntry) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.lock().queue.push(entry);
        self.wakeup.notify_one();
    }

    fn arm_accelerated(self: &Arc<Self>, key: &str) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let mut state = self.lock();
        if let Some(handle) = state.accelerated.get(key) {
            if !handle.is_finished() {
                return false;
            }
        }
        let inner = Arc::clone(self);
        let owned = key.to_string();
        let delay = self.config.accelerated_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.push(QueueEntry::set(owned));
        });
        state.accelerated.insert(key.to_string(), handle);
        true
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State, key: &str, delay: Duration) {
        if let Some(previous) = state.timers.remove(key) {
            previous.abort();
        }
        let inner = Arc::clone(self);
        let owned = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.push(QueueEntry::set(owned));
        });
        state.timers.insert(key.to_string(), handle);
    }

    fn drop_timers(state: &mut State, key: &str) {
        if let Some(handle) = state.timers.remove(key) {
            handle.abort();
        }
        if let Some(handle) = state.accelerated.remove(key) {
            handle.abort();
        }
        state.waiting.remove(&key.to_string());
    }

    async fn run(self: Arc<Self>) {
        log::info!("{} scheduler started", self.reconciler.name());
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wakeup.notified() => {}
            }

            let entries = {
                let mut state = self.lock();
                let mut runnable = Vec::new();
                for entry in state.queue.drain() {
                    if state.in_flight.contains(&entry.key) {
                        state.dirty.entry(entry.key.clone()).or_default().push(entry);
                    } else {
                        state.in_flight.insert(entry.key.clone());
                        runnable.push(entry);
                    }
                }
                runnable
            };

            for entry in entries {
                let inner = Arc::clone(&self);
                tokio::spawn(async move { inner.process(entry).await });
            }
        }
        log::info!("{} scheduler stopped", self.reconciler.name());
    }

    async fn process(self: Arc<Self>, entry: QueueEntry) {
        let permit = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        if permit.is_some() {
            let name = self.reconciler.name();
            let result = self.reconciler.reconcile(&entry.key).await;
            let status = match &result {
                Ok(_) => TaskStatus::Success,
                Err(e) => e.to_status(),
            };
            if let Some(hook) = &self.hook {
                hook(name, status);
            }

            let mut state = self.lock();
            if entry.op.is_del() {
                Self::drop_timers(&mut state, &entry.key);
                drop(state);
                self.reconciler.on_deleted(&entry.key);
                state = self.lock();
            } else if !self.shutdown.is_cancelled() {
                match result {
                    Ok(Requeue::Never) => {
                        if let Some(handle) = state.timers.remove(&entry.key) {
                            handle.abort();
                        }
                    }
                    Ok(Requeue::Resync) => {
                        let period = self.config.resync_period;
                        self.arm_timer(&mut state, &entry.key, period);
                    }
                    Ok(Requeue::After(delay)) => {
                        self.arm_timer(&mut state, &entry.key, delay);
                    }
                    Err(err) => {
                        if let crate::TaskError::WaitingForDependency { constraint } = &err {
                            log::info!("{}: {} waiting on {}", name, entry.key, constraint);
                            state
                                .waiting
                                .add(entry.key.clone(), (), vec![constraint.clone()]);
                        } else if status.is_success() {
                            log::debug!("{}: {} {}", name, entry.key, err);
                        } else {
                            log::warn!("{}: reconcile of {} failed: {}", name, entry.key, err);
                        }
                        let period = self.config.resync_period;
                        self.arm_timer(&mut state, &entry.key, period);
                    }
                }
            }

            state.in_flight.remove(&entry.key);
            if let Some(next) = state.dirty.remove(&entry.key) {
                for queued in next {
                    state.queue.push(queued);
                }
                drop(state);
                self.wakeup.notify_one();
            }
        } else {
            self.lock().in_flight.remove(&entry.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskError, TaskResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        passes: Mutex<Vec<String>>,
        outcome: Mutex<Option<TaskError>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                passes: Mutex::new(Vec::new()),
                outcome: Mutex::new(None),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }

        fn passes(&self) -> Vec<String> {
            self.passes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Reconciler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.passes.lock().unwrap().push(key.to_string());
            self.running.fetch_sub(1, Ordering::SeqCst);
            match self.outcome.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(Requeue::Resync),
            }
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            resync_period: Duration::from_secs(60),
            accelerated_delay: Duration::from_secs(2),
            max_concurrent: 4,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_runs_pass_and_arms_resync() {
        let recorder = Recorder::new();
        let scheduler = Scheduler::new(recorder.clone(), config());
        let _handle = scheduler.start();

        scheduler.enqueue("ethernet1.leaf1");
        settle().await;
        assert_eq!(recorder.passes(), vec!["ethernet1.leaf1".to_string()]);
        assert!(scheduler.has_timer("ethernet1.leaf1"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(recorder.passes().len(), 2);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accelerate_is_debounced() {
        let recorder = Recorder::new();
        let scheduler = Scheduler::new(recorder.clone(), config());
        let _handle = scheduler.start();

        assert!(scheduler.accelerate("leaf1"));
        assert!(!scheduler.accelerate("leaf1"));
        assert!(!scheduler.accelerate("leaf1"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(recorder.passes(), vec!["leaf1".to_string()]);
        assert!(scheduler.accelerate("leaf1"));
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_never_runs_concurrently() {
        let recorder = Recorder::new();
        let scheduler = Scheduler::new(recorder.clone(), config());
        let _handle = scheduler.start();

        scheduler.enqueue("k");
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.enqueue("k");
        scheduler.enqueue("k");
        settle().await;

        assert_eq!(recorder.passes(), vec!["k".to_string(), "k".to_string()]);
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_wait_is_woken_by_satisfy() {
        let recorder = Recorder::new();
        *recorder.outcome.lock().unwrap() = Some(TaskError::waiting_for(Constraint::new(
            "portchannel",
            "po10.leaf1",
        )));
        let scheduler = Scheduler::new(recorder.clone(), config());
        let _handle = scheduler.start();

        scheduler.enqueue("ethernet1.leaf1");
        settle().await;
        assert_eq!(scheduler.waiting_keys(), vec!["ethernet1.leaf1".to_string()]);

        scheduler.satisfy(&Constraint::new("portchannel", "po10.leaf1"));
        settle().await;
        assert_eq!(recorder.passes().len(), 2);
        assert!(scheduler.waiting_keys().is_empty());
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_drops_timers() {
        let recorder = Recorder::new();
        let scheduler = Scheduler::new(recorder.clone(), config());
        let _handle = scheduler.start();

        scheduler.enqueue("po10.leaf1");
        settle().await;
        assert!(scheduler.has_timer("po10.leaf1"));

        scheduler.forget("po10.leaf1");
        settle().await;
        assert!(!scheduler.has_timer("po10.leaf1"));
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_hook_sees_classification() {
        let recorder = Recorder::new();
        *recorder.outcome.lock().unwrap() = Some(TaskError::validation("vlan 7 absent"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: OutcomeHook = Arc::new(move |name, status| {
            sink.lock().unwrap().push((name.to_string(), status));
        });
        let scheduler = Scheduler::with_outcome_hook(recorder.clone(), config(), hook);
        let _handle = scheduler.start();

        scheduler.enqueue("k");
        settle().await;
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![("recorder".to_string(), TaskStatus::Invalid)]
        );
        assert!(scheduler.has_timer("k"));
        scheduler.shutdown();
    }
}
