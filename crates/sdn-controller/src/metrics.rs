//! Reconcile outcome counters.

use prometheus::{IntCounterVec, Opts, Registry};
use sdn_reconcile::{OutcomeHook, TaskStatus};
use std::sync::Arc;

/// `sdn_reconcile_total{reconciler,outcome}`, registered next to the
/// switch client counters.
#[derive(Clone)]
pub struct ControllerMetrics {
    outcomes: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let outcomes = IntCounterVec::new(
            Opts::new("sdn_reconcile_total", "Reconcile passes by outcome"),
            &["reconciler", "outcome"],
        )?;
        registry.register(Box::new(outcomes.clone()))?;
        Ok(Self { outcomes })
    }

    pub fn record(&self, reconciler: &str, status: TaskStatus) {
        self.outcomes
            .with_label_values(&[reconciler, status.as_str()])
            .inc();
    }

    pub fn outcomes(&self, reconciler: &str, status: TaskStatus) -> u64 {
        self.outcomes
            .with_label_values(&[reconciler, status.as_str()])
            .get()
    }

    /// Scheduler hook feeding these counters.
    pub fn outcome_hook(&self) -> OutcomeHook {
        let metrics = self.clone();
        Arc::new(move |reconciler: &str, status: TaskStatus| metrics.record(reconciler, status))
    }
}
