//! Prometheus counters for switch client calls.
//!
//! Every call made through a [`CountingSwitchClient`](crate::CountingSwitchClient)
//! increments both a per-category and a per-operation counter, whether or
//! not the call succeeded.

use crate::client::OperationCategory;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Switch client call counters.
#[derive(Clone)]
pub struct SwitchClientMetrics {
    calls: IntCounterVec,
    operations: IntCounterVec,
    registry: Arc<Registry>,
}

impl SwitchClientMetrics {
    /// Create counters registered in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create counters registered in `registry`
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let calls = IntCounterVec::new(
            Opts::new(
                "sdn_switch_client_calls_total",
                "Switch client calls by operation category",
            ),
            &["switch", "category"],
        )?;
        registry.register(Box::new(calls.clone()))?;

        let operations = IntCounterVec::new(
            Opts::new(
                "sdn_switch_client_operation_total",
                "Switch client calls by operation",
            ),
            &["switch", "operation"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        Ok(Self {
            calls,
            operations,
            registry,
        })
    }

    /// Record one call
    pub fn record(&self, switch: &str, category: OperationCategory, operation: &str) {
        self.calls
            .with_label_values(&[switch, category.as_str()])
            .inc();
        self.operations
            .with_label_values(&[switch, operation])
            .inc();
    }

    /// Calls of `category` made against `switch` so far
    pub fn calls(&self, switch: &str, category: OperationCategory) -> u64 {
        self.calls
            .with_label_values(&[switch, category.as_str()])
            .get()
    }

    /// Calls of `operation` made against `switch` so far
    pub fn operation_calls(&self, switch: &str, operation: &str) -> u64 {
        self.operations.with_label_values(&[switch, operation]).get()
    }

    /// Sum of update, create and delete calls against `switch`
    pub fn mutations(&self, switch: &str) -> u64 {
        OperationCategory::ALL
            .iter()
            .filter(|c| c.is_mutation())
            .map(|c| self.calls(switch, *c))
            .sum()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Render all metrics in Prometheus text format
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_back() {
        let metrics = SwitchClientMetrics::new().unwrap();
        metrics.record("leaf1", OperationCategory::Get, "get_switch_ports");
        metrics.record("leaf1", OperationCategory::Get, "get_bgp_community");
        metrics.record("leaf1", OperationCategory::Update, "update_vlan");
        metrics.record("leaf2", OperationCategory::Create, "create_port_channel");

        assert_eq!(metrics.calls("leaf1", OperationCategory::Get), 2);
        assert_eq!(metrics.operation_calls("leaf1", "update_vlan"), 1);
        assert_eq!(metrics.mutations("leaf1"), 1);
        assert_eq!(metrics.mutations("leaf2"), 1);
        assert_eq!(metrics.calls("leaf3", OperationCategory::Get), 0);
    }

    #[test]
    fn test_gather_metrics() {
        let metrics = SwitchClientMetrics::new().unwrap();
        metrics.record("leaf1", OperationCategory::Delete, "delete_port_channel");

        let output = metrics.gather_metrics();
        assert!(output.contains("sdn_switch_client_calls_total"));
        assert!(output.contains("category=\"delete\""));
        assert!(output.contains("sdn_switch_client_operation_total"));
    }
}
