//! Trigger event log (ring buffer)
//!
//! Short-lived record of accepted button presses, kept only long
//! enough for the dashboard's polling interval to pick them up for
//! the trigger animation. One small ring per source.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Default per-source ring capacity.
const DEFAULT_CAPACITY: usize = 32;

/// One accepted trigger edge.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    /// Process-wide sequence number, monotone across sources
    pub seq: u64,
    pub source: String,
    pub pin: u8,
    /// Epoch milliseconds at acceptance
    pub triggered_at_ms: i64,
}

struct Inner {
    buffers: HashMap<String, VecDeque<TriggerEvent>>,
    next_seq: u64,
}

/// TriggerLog instance.
pub struct TriggerLog {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl TriggerLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                buffers: HashMap::new(),
                next_seq: 1,
            }),
            capacity,
        }
    }

    /// Publish an accepted trigger; oldest events are evicted per
    /// source once the ring is full.
    pub async fn publish(&self, source: &str, pin: u8) -> TriggerEvent {
        let mut inner = self.inner.write().await;
        let event = TriggerEvent {
            seq: inner.next_seq,
            source: source.to_string(),
            pin,
            triggered_at_ms: Utc::now().timestamp_millis(),
        };
        inner.next_seq += 1;

        let buffer = inner
            .buffers
            .entry(source.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());

        event
    }

    /// Latest events across all sources, newest first.
    pub async fn recent(&self, count: usize) -> Vec<TriggerEvent> {
        let inner = self.inner.read().await;
        let mut events: Vec<TriggerEvent> = inner
            .buffers
            .values()
            .flat_map(|b| b.iter().cloned())
            .collect();
        events.sort_by(|a, b| b.seq.cmp(&a.seq));
        events.truncate(count);
        events
    }

    /// Latest events for one source, newest first.
    pub async fn recent_for(&self, source: &str, count: usize) -> Vec<TriggerEvent> {
        let inner = self.inner.read().await;
        inner
            .buffers
            .get(source)
            .map(|b| b.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for TriggerLog {
    fn default() -> Self {
        Self::new()
    }
}
