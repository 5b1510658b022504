//! Bounded per-channel priority queue.
//!
//! High before normal before low; FIFO among equal priority. A full queue
//! hands the message back instead of waiting.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use super::message::{InboundMessage, MessagePriority};

/// A message waiting for dispatch.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: InboundMessage,
    pub enqueued_at: Instant,
    /// Dispatch attempts made so far
    pub attempts: u32,
    seq: u64,
}

impl QueuedMessage {
    pub fn priority(&self) -> MessagePriority {
        self.message.priority
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    // Max-heap: higher priority first, then the lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedMessage>,
    capacity: usize,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
        }
    }

    fn seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enqueue, or give the message back if the queue is full.
    pub fn push(&mut self, message: InboundMessage) -> Result<(), InboundMessage> {
        if self.is_full() {
            return Err(message);
        }
        let seq = self.seq();
        self.heap.push(QueuedMessage {
            message,
            enqueued_at: Instant::now(),
            attempts: 0,
            seq,
        });
        Ok(())
    }

    /// Put a message back after a failed dispatch. It goes behind the
    /// messages of its priority that are already waiting.
    pub fn requeue(&mut self, mut queued: QueuedMessage) -> Result<(), QueuedMessage> {
        if self.is_full() {
            return Err(queued);
        }
        queued.seq = self.seq();
        self.heap.push(queued);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.heap.pop()
    }

    /// Remove and return everything, highest priority first.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(q) = self.heap.pop() {
            out.push(q);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, priority: MessagePriority) -> InboundMessage {
        InboundMessage::new("cli", "u", "c", content).with_priority(priority)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut q = PriorityQueue::new(10);
        q.push(msg("h1", MessagePriority::High)).unwrap();
        q.push(msg("n1", MessagePriority::Normal)).unwrap();
        q.push(msg("h2", MessagePriority::High)).unwrap();
        q.push(msg("l1", MessagePriority::Low)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| q.pop())
            .map(|m| m.message.content)
            .collect();
        assert_eq!(order, vec!["h1", "h2", "n1", "l1"]);
    }

    #[test]
    fn test_full_queue_returns_message() {
        let mut q = PriorityQueue::new(1);
        q.push(msg("a", MessagePriority::Normal)).unwrap();
        let rejected = q.push(msg("b", MessagePriority::High)).unwrap_err();
        assert_eq!(rejected.content, "b");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_requeue_goes_behind_equal_priority() {
        let mut q = PriorityQueue::new(10);
        q.push(msg("a", MessagePriority::Normal)).unwrap();
        q.push(msg("b", MessagePriority::Normal)).unwrap();
        let mut first = q.pop().unwrap();
        first.attempts = 1;
        q.requeue(first).unwrap();

        let next = q.pop().unwrap();
        assert_eq!(next.message.content, "b");
        let again = q.pop().unwrap();
        assert_eq!(again.message.content, "a");
        assert_eq!(again.attempts, 1);
    }

    #[test]
    fn test_drain_empties() {
        let mut q = PriorityQueue::new(4);
        q.push(msg("l", MessagePriority::Low)).unwrap();
        q.push(msg("h", MessagePriority::High)).unwrap();
        let drained = q.drain();
        assert_eq!(drained[0].message.content, "h");
        assert!(q.is_empty());
    }
}
