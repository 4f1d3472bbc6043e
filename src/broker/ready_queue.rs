//! FIFO of idle worker identities
//!
//! Bounded by the number of workers the broker started, so a push can only
//! fail if a worker announces readiness twice.
//! Uses crossbeam-queue for lock-free push/pop.

use crossbeam_queue::ArrayQueue;
use std::fmt;

/// Identity of a broker worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Ready queue; the longest-idle worker is popped first
pub struct ReadyQueue {
    queue: ArrayQueue<WorkerId>,
}

impl ReadyQueue {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Append a worker that just became idle
    ///
    /// # Returns
    /// - `Err(id)` - queue is full, the worker is already queued
    #[inline]
    pub fn push(&self, worker: WorkerId) -> Result<(), WorkerId> {
        self.queue.push(worker)
    }

    /// Take the longest-idle worker
    #[inline]
    pub fn pop(&self) -> Option<WorkerId> {
        self.queue.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
