//! Per-resource event history.
//!
//! Every reconcile failure and every device mutation is recorded as an event
//! on the record that owns it, so operators can see why a port is not
//! converging without reading controller logs. Repeated identical events are
//! folded into one entry with a counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// An event attached to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Record kind (e.g. "switchport")
    pub kind: String,
    /// Record key
    pub name: String,
    pub event_type: EventType,
    /// Short machine-friendly reason (e.g. "VlanNotFound")
    pub reason: String,
    pub message: String,
    /// Number of identical consecutive occurrences
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Event {
    fn same_occurrence(&self, other: &Event) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.event_type == other.event_type
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Bounded, shared event log.
pub struct EventRecorder {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
    tx: broadcast::Sender<Event>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            tx,
        }
    }

    pub fn normal(&self, kind: &str, name: &str, reason: &str, message: impl Into<String>) {
        self.record(kind, name, EventType::Normal, reason, message.into());
    }

    pub fn warning(&self, kind: &str, name: &str, reason: &str, message: impl Into<String>) {
        self.record(kind, name, EventType::Warning, reason, message.into());
    }

    pub fn record(
        &self,
        kind: &str,
        name: &str,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        match event_type {
            EventType::Normal => log::info!("[{}/{}] {}: {}", kind, name, reason, message),
            EventType::Warning => log::warn!("[{}/{}] {}: {}", kind, name, reason, message),
        }

        let now = Utc::now();
        let mut event = Event {
            kind: kind.to_string(),
            name: name.to_string(),
            event_type,
            reason: reason.to_string(),
            message,
            count: 1,
            first_seen: now,
            last_seen: now,
        };

        {
            let mut events = match self.events.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let repeated = events
                .iter()
                .rposition(|e| e.kind == event.kind && e.name == event.name)
                .filter(|&i| events[i].same_occurrence(&event));

            match repeated {
                Some(i) => {
                    let existing = &mut events[i];
                    existing.count += 1;
                    existing.last_seen = now;
                    event = existing.clone();
                }
                None => {
                    if events.len() == self.capacity {
                        events.pop_front();
                    }
                    events.push_back(event.clone());
                }
            }
        }

        let _ = self.tx.send(event);
    }

    /// Events recorded for one record, oldest first.
    pub fn events_for(&self, kind: &str, name: &str) -> Vec<Event> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.kind == kind && e.name == name)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Streams events recorded after this call (including repeats).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}
