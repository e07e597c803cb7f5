//! Fixed-capacity ring buffer for the block and confirmed-tx windows

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Oldest entries are evicted silently once `capacity` is reached.
/// Serializes as a plain list, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<T>", from = "Vec<T>")]
pub struct RingBuffer<T: Clone> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted entry if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) {
        self.items.retain(f);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> From<RingBuffer<T>> for Vec<T> {
    fn from(ring: RingBuffer<T>) -> Self {
        ring.items.into()
    }
}

// Capacity is not carried on the wire; a deserialized window is exactly as
// large as what it holds
impl<T: Clone> From<Vec<T>> for RingBuffer<T> {
    fn from(items: Vec<T>) -> Self {
        let capacity = items.len().max(1);
        Self {
            items: items.into(),
            capacity,
        }
    }
}
