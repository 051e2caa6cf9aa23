//! Bounded replay buffer of recently broadcast events.
//!
//! The broker's dispatch task is the only appender. Readers always receive
//! an owned copy, never a reference into the buffer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

use chrono::Utc;
use lumen_core::types::Timestamp;
use serde::Serialize;

/// Default number of events retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One broadcast event as remembered by the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: Timestamp,
    pub event: String,
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            data,
        }
    }
}

/// Fixed-capacity FIFO ring buffer of [`EventRecord`]s.
pub struct EventHistory {
    events: RwLock<VecDeque<EventRecord>>,
    capacity: usize,
}

impl EventHistory {
    /// Create an empty history. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest entry when full.
    pub fn push(&self, record: EventRecord) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(record);
    }

    /// The most recent `limit` records, oldest first.
    ///
    /// A `limit` of zero, or one larger than the buffer, returns everything.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let limit = if limit == 0 || limit > events.len() {
            events.len()
        } else {
            limit
        };
        events.iter().skip(events.len() - limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of retained records per event name.
    pub fn counts_by_event(&self) -> BTreeMap<String, usize> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let mut counts = BTreeMap::new();
        for record in events.iter() {
            *counts.entry(record.event.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
