//! Bounded FIFO handoff between producers and a single send loop.
//!
//! When full, new items are rejected; queued items are never evicted. The
//! consumer looks at the head with [`BoundedQueue::peek`] and removes it
//! with [`BoundedQueue::pop`] only once it has been transmitted, so an item
//! that is being retried still counts against the capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;

use crate::Envelope;

/// An envelope waiting in a reliable queue.
#[derive(Debug, Clone)]
pub struct OutboundEntry {
    pub envelope: Arc<Envelope>,
    pub enqueued_at: Instant,
}

impl OutboundEntry {
    pub fn new(envelope: Arc<Envelope>) -> Self {
        Self {
            envelope,
            enqueued_at: Instant::now(),
        }
    }
}

/// Capacity-limited FIFO queue.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    ready: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Every critical section is a single VecDeque call; a panic inside
        // one cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item` at the tail.
    ///
    /// Returns the new depth, or hands the item back if the queue is full.
    pub fn try_push(&self, item: T) -> Result<usize, T> {
        let depth = {
            let mut items = self.items();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
            items.len()
        };
        self.ready.notify_one();
        Ok(depth)
    }

    /// Remove and return the head.
    pub fn pop(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// Remove everything, returning the items in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Wait until the queue is non-empty and return a copy of the head.
    ///
    /// The head stays queued until [`pop`](Self::pop) is called.
    pub async fn peek(&self) -> T {
        loop {
            let head = self.items().front().cloned();
            if let Some(head) = head {
                return head;
            }
            self.ready.notified().await;
        }
    }
}
