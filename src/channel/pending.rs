// Bounded FIFO of payloads awaiting delivery. Overflow drops the oldest entry.

use std::collections::VecDeque;

/// Default number of undelivered payloads kept while the link is down.
pub const DEFAULT_MAX_PENDING: usize = 10;

#[derive(Debug, Clone)]
pub struct PendingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T: Clone> PendingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append; returns the entry evicted to make room, if any.
    pub fn push_back(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        self.evict_overflow()
    }

    /// Put a payload back at the head (it was taken for sending and failed).
    /// When full, the head is the oldest entry and is the one dropped.
    pub fn push_front(&mut self, item: T) -> Option<T> {
        self.items.push_front(item);
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Option<T> {
        let mut evicted = None;
        while self.items.len() > self.capacity {
            evicted = self.items.pop_front();
            self.dropped += 1;
        }
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Copy of the queued payloads, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
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

    /// Payloads lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_keeps_most_recent() {
        let mut buf = PendingBuffer::new(3);
        for i in 0..5 {
            buf.push_back(i);
        }
        assert_eq!(buf.snapshot(), vec![2, 3, 4]);
        assert_eq!(buf.dropped(), 2);
    }

    #[test]
    fn push_front_when_full_drops_the_reinserted_head() {
        let mut buf = PendingBuffer::new(2);
        buf.push_back(1);
        buf.push_back(2);
        assert_eq!(buf.push_front(0), Some(0));
        assert_eq!(buf.snapshot(), vec![1, 2]);
    }
}
