//! Short-term memory: a bounded buffer of recent events for one agent.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Buffer size used when configuration does not say otherwise.
pub const DEFAULT_SHORT_TERM_CAPACITY: usize = 100;

/// An event together with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermEvent {
    pub timestamp: DateTime<Utc>,
    /// Position in the buffer's lifetime; keeps counting across evictions.
    pub sequence_id: u64,
    pub payload: Value,
}

/// Snapshot of a buffer's occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermInfo {
    pub size: usize,
    pub capacity: usize,
    pub is_full: bool,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub utilization_percent: f64,
}

/// Capacity-bounded FIFO of events.
///
/// Adding to a full buffer evicts the oldest event, so `size() <= capacity()`
/// always holds.
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    events: VecDeque<ShortTermEvent>,
    capacity: usize,
    next_sequence: u64,
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_TERM_CAPACITY)
    }
}

impl ShortTermMemory {
    /// Create an empty buffer holding at most `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "short-term capacity must be at least 1");
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 0,
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn add_event(&mut self, payload: Value) -> &ShortTermEvent {
        if self.events.len() == self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                log::debug!(
                    "[ShortTermMemory] evicted event {} (capacity {})",
                    evicted.sequence_id,
                    self.capacity
                );
            }
        }
        let event = ShortTermEvent {
            timestamp: Utc::now(),
            sequence_id: self.next_sequence,
            payload,
        };
        self.next_sequence += 1;
        self.events.push_back(event);
        &self.events[self.events.len() - 1]
    }

    /// Payloads of the last `min(n, size)` events, oldest first.
    pub fn get_recent(&self, n: usize) -> Vec<Value> {
        self.recent(n).map(|event| event.payload.clone()).collect()
    }

    pub fn get_recent_with_metadata(&self, n: usize) -> Vec<ShortTermEvent> {
        self.recent(n).cloned().collect()
    }

    /// Payloads recorded strictly after `since`.
    pub fn get_events_since(&self, since: DateTime<Utc>) -> Vec<Value> {
        self.events
            .iter()
            .filter(|event| event.timestamp > since)
            .map(|event| event.payload.clone())
            .collect()
    }

    pub fn get_all_events(&self) -> Vec<Value> {
        self.events.iter().map(|event| event.payload.clone()).collect()
    }

    /// Empty the buffer. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.events.len() == self.capacity
    }

    pub fn info(&self) -> ShortTermInfo {
        ShortTermInfo {
            size: self.size(),
            capacity: self.capacity,
            is_full: self.is_full(),
            oldest: self.events.front().map(|e| e.timestamp),
            newest: self.events.back().map(|e| e.timestamp),
            utilization_percent: self.size() as f64 / self.capacity as f64 * 100.0,
        }
    }

    fn recent(&self, n: usize) -> impl Iterator<Item = &ShortTermEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fifo_eviction() {
        let mut memory = ShortTermMemory::new(3);
        for event in ["a", "b", "c", "d"] {
            memory.add_event(json!(event));
        }
        assert_eq!(memory.get_recent(3), vec![json!("b"), json!("c"), json!("d")]);
        assert_eq!(memory.size(), 3);
        assert!(memory.is_full());
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut memory = ShortTermMemory::new(5);
        for i in 0..23 {
            memory.add_event(json!(i));
            assert!(memory.size() <= memory.capacity());
        }
        assert_eq!(memory.get_all_events().first(), Some(&json!(18)));
    }

    #[test]
    fn test_get_recent_bounds() {
        let mut memory = ShortTermMemory::new(10);
        memory.add_event(json!(1));
        memory.add_event(json!(2));
        assert_eq!(memory.get_recent(50), vec![json!(1), json!(2)]);
        assert_eq!(memory.get_recent(1), vec![json!(2)]);
        assert!(memory.get_recent(0).is_empty());
    }

    #[test]
    fn test_sequence_ids_continue_after_eviction() {
        let mut memory = ShortTermMemory::new(2);
        for i in 0..4 {
            memory.add_event(json!(i));
        }
        let ids: Vec<u64> = memory
            .get_recent_with_metadata(2)
            .iter()
            .map(|e| e.sequence_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_events_since_is_strict() {
        let mut memory = ShortTermMemory::new(10);
        let first = memory.add_event(json!("first")).timestamp;
        std::thread::sleep(std::time::Duration::from_millis(5));
        memory.add_event(json!("second"));
        assert_eq!(memory.get_events_since(first), vec![json!("second")]);
        assert!(memory.get_events_since(Utc::now()).is_empty());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut memory = ShortTermMemory::new(4);
        memory.add_event(json!({"k": 1}));
        memory.clear();
        assert_eq!(memory.size(), 0);
        assert_eq!(memory.capacity(), 4);
        assert!(!memory.is_full());
    }

    #[test]
    fn test_info() {
        let mut memory = ShortTermMemory::new(4);
        let empty = memory.info();
        assert_eq!(empty.size, 0);
        assert!(empty.oldest.is_none());
        assert_eq!(empty.utilization_percent, 0.0);

        memory.add_event(json!(1));
        memory.add_event(json!(2));
        let info = memory.info();
        assert_eq!(info.size, 2);
        assert_eq!(info.utilization_percent, 50.0);
        assert!(info.oldest <= info.newest);
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_capacity_panics() {
        ShortTermMemory::new(0);
    }
}
