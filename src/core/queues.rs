//! Hold and pending queues
//!
//! Both are FIFO VecDeques with lazy deletion: removing a message only
//! unindexes it, and the stale slot is dropped when it reaches the front.
//! `len()` always reports live messages, never tombstones.

use std::collections::VecDeque;
use tracing::{debug, trace};

use super::index::{GeometryIndex, Stage};
use super::message::ChatMessage;

/// A message waiting in the hold or pending stage
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub seq: u64,
    pub message: ChatMessage,
    /// Host time of arrival (ms)
    pub arrived_at: f64,
    /// Earliest time the message may leave the hold stage (ms)
    pub hold_release_at: f64,
    /// Set when promoted into the pending queue (ms)
    pub pending_since: Option<f64>,
}

impl QueuedMessage {
    pub fn id(&self) -> &str {
        &self.message.id
    }
}

// ============================================================================
// HoldQueue
// ============================================================================

/// Grace-period buffer. Ordered by `hold_release_at` because the delay is fixed.
#[derive(Debug, Default)]
pub struct HoldQueue {
    items: VecDeque<QueuedMessage>,
    live: usize,
}

impl HoldQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: QueuedMessage) {
        self.items.push_back(msg);
        self.live += 1;
    }

    /// Pop every live message whose hold has expired, in arrival order.
    pub fn release_due(&mut self, now: f64, index: &GeometryIndex) -> Vec<QueuedMessage> {
        let mut released = Vec::new();

        while let Some(front) = self.items.front() {
            if !index.is_live(front.id(), front.seq, Stage::Hold) {
                trace!(id = front.id(), seq = front.seq, "Dropping hold tombstone");
                self.items.pop_front();
                continue;
            }
            if front.hold_release_at > now {
                break;
            }
            if let Some(msg) = self.items.pop_front() {
                self.live -= 1;
                released.push(msg);
            }
        }

        if !released.is_empty() {
            trace!(count = released.len(), remaining = self.live, "Released from hold");
        }
        released
    }

    /// Account for a message unindexed while in this stage
    pub fn mark_removed(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    /// Live message count
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Physical slots, tombstones included
    pub fn slots(&self) -> usize {
        self.items.len()
    }

    /// Iterate live messages in order
    pub fn iter_live<'a>(&'a self, index: &'a GeometryIndex) -> impl Iterator<Item = &'a QueuedMessage> {
        self.items
            .iter()
            .filter(move |m| index.is_live(m.id(), m.seq, Stage::Hold))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.live = 0;
    }
}

// ============================================================================
// PendingQueue
// ============================================================================

/// Bounded FIFO of messages eligible for placement
#[derive(Debug)]
pub struct PendingQueue {
    items: VecDeque<QueuedMessage>,
    live: usize,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            live: 0,
            capacity,
        }
    }

    /// Append if there is room, otherwise hand the message back.
    pub fn try_push(&mut self, msg: QueuedMessage, index: &GeometryIndex) -> Result<(), QueuedMessage> {
        if self.live >= self.capacity {
            return Err(msg);
        }
        if self.items.len() >= self.capacity.saturating_mul(2).max(16) {
            self.compact(index);
        }
        self.items.push_back(msg);
        self.live += 1;
        Ok(())
    }

    /// Pop the oldest live message
    pub fn pop_live(&mut self, index: &GeometryIndex) -> Option<QueuedMessage> {
        while let Some(msg) = self.items.pop_front() {
            if index.is_live(msg.id(), msg.seq, Stage::Pending) {
                self.live -= 1;
                return Some(msg);
            }
            trace!(id = msg.id(), seq = msg.seq, "Dropping pending tombstone");
        }
        None
    }

    /// Put unplaced messages back at the front, preserving their order
    pub fn requeue_front(&mut self, msgs: Vec<QueuedMessage>) {
        self.live += msgs.len();
        for msg in msgs.into_iter().rev() {
            self.items.push_front(msg);
        }
    }

    /// Account for a message unindexed while in this stage
    pub fn mark_removed(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    /// Discard all tombstones
    pub fn compact(&mut self, index: &GeometryIndex) {
        let before = self.items.len();
        self.items
            .retain(|m| index.is_live(m.id(), m.seq, Stage::Pending));
        debug!(before, after = self.items.len(), "Compacted pending queue");
    }

    /// Live message count
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical slots, tombstones included
    pub fn slots(&self) -> usize {
        self.items.len()
    }

    /// Iterate live messages in order
    pub fn iter_live<'a>(&'a self, index: &'a GeometryIndex) -> impl Iterator<Item = &'a QueuedMessage> {
        self.items
            .iter()
            .filter(move |m| index.is_live(m.id(), m.seq, Stage::Pending))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.live = 0;
    }
}
