//! Deduplicating work queue of resource keys.

use std::collections::{BTreeMap, VecDeque};

/// What happened to the record behind a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Record created or updated
    Set,
    /// Record deleted
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A queued key and the operation that queued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: String,
    pub op: Operation,
}

impl QueueEntry {
    pub fn set(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Operation::Set,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Operation::Del,
        }
    }
}

/// Pending keys for one reconciler.
///
/// Reconcilers are level-triggered, so the queue only has to remember
/// *that* a key needs attention, not how many times it changed.
///
/// # Deduplication Logic
///
/// When multiple operations arrive for the same key:
/// - Multiple SET: collapse into one
/// - DEL: clears pending SETs and replaces them
/// - DEL then SET: keep both (record deleted then recreated)
#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: BTreeMap<String, VecDeque<Operation>>,
    pending_count: usize,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    pub fn push(&mut self, entry: QueueEntry) {
        let queue = self.pending.entry(entry.key).or_default();

        match entry.op {
            Operation::Del => {
                self.pending_count -= queue.len();
                queue.clear();
                queue.push_back(Operation::Del);
                self.pending_count += 1;
            }
            Operation::Set => {
                if queue.back() == Some(&Operation::Set) {
                    return;
                }
                queue.push_back(Operation::Set);
                self.pending_count += 1;
            }
        }
    }

    /// Drains all pending entries, grouped by key in key order.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        let mut result = Vec::with_capacity(self.pending_count);

        for (key, ops) in std::mem::take(&mut self.pending) {
            for op in ops {
                result.push(QueueEntry {
                    key: key.clone(),
                    op,
                });
            }
        }

        self.pending_count = 0;
        result
    }

    /// Re-queues an entry ahead of anything pending for the same key.
    pub fn retry(&mut self, entry: QueueEntry) {
        let queue = self.pending.entry(entry.key).or_default();
        queue.push_front(entry.op);
        self.pending_count += 1;
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_count = 0;
    }

    /// Dumps pending entries for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.pending
            .iter()
            .flat_map(|(key, ops)| {
                ops.iter()
                    .map(move |op| format!("{}: {}", key, if op.is_set() { "SET" } else { "DEL" }))
            })
            .collect()
    }
}
