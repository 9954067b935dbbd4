use std::collections::VecDeque;
use std::fmt;

/// Bounded FIFO: pushing into a full queue silently drops the oldest item.
pub struct CircularQueue<T> {
    deque: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> Clone for CircularQueue<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CircularQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deque.fmt(f)
    }
}

impl<T> CircularQueue<T> {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap.max(1),
        }
    }

    /// Appends `item` as the newest entry, returning the evicted oldest one.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() {
            self.deque.pop_front()
        } else {
            None
        };

        self.deque.push_back(item);

        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() == self.capacity
    }

    /// Oldest first.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ T> {
        self.deque.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_is_dropped_when_full() {
        let mut queue = CircularQueue::with_capacity(3);

        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), None);
        assert!(queue.is_full());
        assert_eq!(queue.push(4), Some(1));

        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn zero_capacity_keeps_the_newest_item() {
        let mut queue = CircularQueue::with_capacity(0);

        assert_eq!(queue.push("a"), None);
        assert_eq!(queue.push("b"), Some("a"));
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }
}
