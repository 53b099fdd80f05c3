//! Bounded per-partition event ring.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rcc_core::Event;

/// A bounded ring of sequenced events for one partition.
///
/// Invariants: `len() ≤ capacity`, contained ids strictly increase,
/// and the oldest entry is evicted first when the ring is full.
/// Buffers are created lazily and never destroyed while the hub runs,
/// so references stay valid after the hub lock is released.
pub struct EventBuffer {
    capacity: usize,
    retention: chrono::Duration,
    events: Mutex<VecDeque<Event>>,
}

impl EventBuffer {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity,
            retention: chrono::Duration::from_std(retention)
                .unwrap_or(chrono::TimeDelta::MAX),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a sequenced event, evicting the oldest entry at capacity
    /// and pruning anything older than the retention window.
    pub fn push(&self, event: Event) {
        let cutoff = chrono::Utc::now() - self.retention;
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());

        while events.front().is_some_and(|e| e.created_at < cutoff) {
            events.pop_front();
        }
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// All retained events with `id > after`, oldest first.
    pub fn events_after(&self, after: i64) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.id > after)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the oldest retained event, if any.
    pub fn oldest_id(&self) -> Option<i64> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .map(|e| e.id)
    }
}
