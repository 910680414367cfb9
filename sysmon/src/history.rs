use std::collections::VecDeque;

pub const DEFAULT_HISTORY_POINTS: usize = 30;

/// Bounded FIFO of sampled data points.
///
/// Appending past capacity drops the oldest entry, so `len() <= capacity()`
/// holds after every call. Not synchronized; owners wrap it in a mutex.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, item: T) {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Copy of the contents, oldest first.
    pub fn items(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> Default for HistoryBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_POINTS)
    }
}
