//! Outgoing queue for frames that could not be sent immediately.
//!
//! Queued frames are replayed in order right after the resume handshake.
//! When full, the oldest frame is evicted to make room.

use std::collections::VecDeque;

/// Bounded FIFO of serialized frames.
#[derive(Debug, Clone)]
pub struct OutgoingQueue {
    queue: VecDeque<String>,
    capacity: usize,
}

impl OutgoingQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a frame. Returns the evicted oldest frame on overflow.
    pub fn push(&mut self, frame: String) -> Option<String> {
        if self.capacity == 0 {
            return Some(frame);
        }
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(frame);
        evicted
    }

    /// Take the oldest frame.
    pub fn pop_front(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    /// Put a frame back at the head, e.g. after a failed replay.
    pub fn push_front(&mut self, frame: String) {
        if self.capacity == 0 {
            return;
        }
        if self.queue.len() >= self.capacity {
            // The head is older than anything behind it; the tail is what goes.
            self.queue.pop_back();
        }
        self.queue.push_front(frame);
    }

    /// Drain all frames in submission order.
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo() {
        let mut queue = OutgoingQueue::new(10);
        assert!(queue.is_empty());

        queue.push("one".into());
        queue.push("two".into());
        queue.push("three".into());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec!["one", "two", "three"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut queue = OutgoingQueue::new(3);
        assert_eq!(queue.push("1".into()), None);
        assert_eq!(queue.push("2".into()), None);
        assert_eq!(queue.push("3".into()), None);
        assert_eq!(queue.push("4".into()), Some("1".to_string()));
        assert_eq!(queue.push("5".into()), Some("2".to_string()));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec!["3", "4", "5"]);
    }

    #[test]
    fn test_default_capacity() {
        let mut queue = OutgoingQueue::default();
        for i in 0..350 {
            queue.push(format!("m{i}"));
        }
        assert_eq!(queue.len(), 300);
        assert_eq!(queue.pop_front().as_deref(), Some("m50"));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut queue = OutgoingQueue::new(0);
        assert_eq!(queue.push("x".into()), Some("x".to_string()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_restores_head() {
        let mut queue = OutgoingQueue::new(3);
        queue.push("a".into());
        queue.push("b".into());
        let head = queue.pop_front().unwrap();
        queue.push_front(head);
        assert_eq!(queue.drain(), vec!["a", "b"]);
    }

    #[test]
    fn test_clear() {
        let mut queue = OutgoingQueue::new(5);
        queue.push("a".into());
        queue.clear();
        assert!(queue.is_empty());
    }
}
