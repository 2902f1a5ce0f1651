//! Bounded recent-readings window for the selected temple.

use crowd_core::{EntityKey, Reading};
use std::collections::VecDeque;

/// Default number of readings kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Newest-first reading history scoped to one temple.
///
/// Length never exceeds `capacity`; pushing onto a full buffer evicts the
/// oldest entry.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entity: Option<EntityKey>,
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entity: None,
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Temple this buffer currently belongs to.
    pub fn entity(&self) -> Option<&EntityKey> {
        self.entity.as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Most recent reading.
    pub fn head(&self) -> Option<&Reading> {
        self.readings.front()
    }

    /// Prepend a live reading, evicting the oldest on overflow.
    pub fn push_front(&mut self, reading: Reading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_back();
        }
        self.readings.push_front(reading);
    }

    /// Replace the whole buffer with a fetched history (already newest-first).
    pub fn replace(&mut self, entity: EntityKey, readings: Vec<Reading>) {
        self.entity = Some(entity);
        self.readings = readings.into_iter().take(self.capacity).collect();
    }

    /// Re-scope the buffer to another temple, dropping its contents.
    pub fn rescope(&mut self, entity: EntityKey) {
        self.entity = Some(entity);
        self.readings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
