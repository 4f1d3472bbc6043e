//! Client session state shared by the caller and the receive loop
//!
//! Replies carry no request id, so pending results are matched FIFO: the
//! oldest live slot takes the next `Result` off the wire. Control replies
//! (acks, semester and failover answers) use a separate FIFO of waiters.

use crate::core::model::AllocationResult;
use crate::protocol::Message;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Locally generated request identifier, never sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Ordered pending-result slots
#[derive(Default)]
pub struct PendingRequests {
    next_id: u64,
    slots: VecDeque<(RequestId, oneshot::Sender<AllocationResult>)>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slot at the back of the queue
    pub fn register(&mut self) -> (RequestId, oneshot::Receiver<AllocationResult>) {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        let (tx, rx) = oneshot::channel();
        self.slots.push_back((id, tx));
        (id, rx)
    }

    /// Hand `result` to the oldest slot whose caller is still waiting
    ///
    /// Returns the resolved id, or the result back when no slot takes it.
    pub fn resolve_oldest(
        &mut self,
        mut result: AllocationResult,
    ) -> Result<RequestId, AllocationResult> {
        while let Some((id, tx)) = self.slots.pop_front() {
            match tx.send(result) {
                Ok(()) => return Ok(id),
                Err(returned) => result = returned,
            }
        }
        Err(result)
    }

    /// Drop a slot after its caller gave up
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot, _)| *slot != id);
        self.slots.len() != before
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every slot; waiting callers observe a closed channel
    ///
    /// Returns how many slots were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.slots.len();
        self.slots.clear();
        dropped
    }
}

/// FIFO of callers waiting for a control reply
#[derive(Default)]
pub struct ControlWaiters {
    waiters: VecDeque<oneshot::Sender<Message>>,
}

impl ControlWaiters {
    pub fn register(&mut self) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Returns the reply back when nobody is waiting
    pub fn resolve_oldest(&mut self, mut reply: Message) -> Result<(), Message> {
        while let Some(tx) = self.waiters.pop_front() {
            match tx.send(reply) {
                Ok(()) => return Ok(()),
                Err(returned) => reply = returned,
            }
        }
        Err(reply)
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.waiters.len();
        self.waiters.clear();
        dropped
    }
}

/// Heartbeat bookkeeping for one link
#[derive(Debug)]
pub struct LinkHealth {
    interval: Duration,
    reply_timeout: Duration,
    last_received: Instant,
    heartbeat_sent_at: Option<Instant>,
    reachable: bool,
}

impl LinkHealth {
    pub fn new(interval: Duration, reply_timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            reply_timeout,
            last_received: now,
            heartbeat_sent_at: None,
            reachable: true,
        }
    }

    /// Any inbound message proves the server alive
    pub fn record_received(&mut self, now: Instant) {
        self.last_received = now;
        self.heartbeat_sent_at = None;
        self.reachable = true;
    }

    /// Quiet for a full interval with no heartbeat outstanding
    pub fn needs_heartbeat(&self, now: Instant) -> bool {
        self.heartbeat_sent_at.is_none()
            && now.saturating_duration_since(self.last_received) >= self.interval
    }

    pub fn record_heartbeat_sent(&mut self, now: Instant) {
        self.heartbeat_sent_at = Some(now);
    }

    /// Expire an unanswered heartbeat
    ///
    /// Returns true when this call flipped the link to unreachable.
    pub fn evaluate(&mut self, now: Instant) -> bool {
        match self.heartbeat_sent_at {
            Some(sent) if now.saturating_duration_since(sent) >= self.reply_timeout => {
                self.heartbeat_sent_at = None;
                let was_reachable = self.reachable;
                self.reachable = false;
                was_reachable
            }
            _ => false,
        }
    }

    pub fn mark_unreachable(&mut self) {
        self.reachable = false;
        self.heartbeat_sent_at = None;
    }

    #[inline]
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }
}

/// Client traffic counters
#[derive(Debug, Default)]
pub struct ClientCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    connection_errors: AtomicU64,
}

impl ClientCounters {
    #[inline]
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.connection_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientStats {
        ClientStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_errors: u64,
}

impl fmt::Display for ClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} received={} connection_errors={}",
            self.messages_sent, self.messages_received, self.connection_errors
        )
    }
}
