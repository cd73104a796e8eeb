//! Bounded, lossy deletion event queue.
//!
//! A fixed ring of [`DeletionEvent`] slots allocated once at start. Producers
//! never block or fail: with [`OverflowPolicy::OverwriteOldest`] a push into a
//! full ring replaces the oldest event. Sequence numbers are assigned inside
//! the lock so they follow FIFO order exactly.

use serde::{Deserialize, Serialize};

use crate::context::ExecContext;
use crate::error::TrackerError;
use crate::record::DeletionEvent;
use crate::sync::SpinLock;

/// What to do with a push into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued event to make room.
    #[default]
    OverwriteOldest,
    /// Drop the incoming event.
    RejectNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued(u32),
    /// Queued after discarding the oldest event.
    Overwrote(u32),
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    /// Events accepted since start.
    pub pushed: u64,
    /// Events lost to overflow, overwritten or rejected.
    pub dropped: u64,
}

struct Ring {
    slots: Box<[DeletionEvent]>,
    head: usize,
    tail: usize,
    count: usize,
    next_seq: u32,
    pushed: u64,
    dropped: u64,
}

impl Ring {
    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        // Zero marks an unassigned record, so skip it on wrap.
        self.next_seq = self.next_seq.checked_add(1).unwrap_or(1);
        seq
    }
}

pub struct EventQueue {
    ring: SpinLock<Ring>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self, TrackerError> {
        if capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| TrackerError::Allocation("event queue slots"))?;
        slots.resize(capacity, DeletionEvent::EMPTY);
        Ok(Self {
            ring: SpinLock::new(Ring {
                slots: slots.into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
                next_seq: 1,
                pushed: 0,
                dropped: 0,
            }),
            capacity,
            policy,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn push(&self, _cx: &impl ExecContext, mut event: DeletionEvent) -> PushOutcome {
        let mut ring = self.ring.lock();
        let full = ring.count == self.capacity;
        if full && self.policy == OverflowPolicy::RejectNew {
            ring.dropped += 1;
            return PushOutcome::Rejected;
        }

        event.sequence_id = ring.take_seq();
        let tail = ring.tail;
        ring.slots[tail] = event;
        ring.tail = (tail + 1) % self.capacity;
        ring.pushed += 1;
        if full {
            ring.head = (ring.head + 1) % self.capacity;
            ring.dropped += 1;
            PushOutcome::Overwrote(event.sequence_id)
        } else {
            ring.count += 1;
            PushOutcome::Queued(event.sequence_id)
        }
    }

    pub fn pop(&self, _cx: &impl ExecContext) -> Option<DeletionEvent> {
        let mut ring = self.ring.lock();
        if ring.count == 0 {
            return None;
        }
        let head = ring.head;
        let event = ring.slots[head];
        ring.head = (head + 1) % self.capacity;
        ring.count -= 1;
        Some(event)
    }

    pub fn len(&self, _cx: &impl ExecContext) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self, cx: &impl ExecContext) -> bool {
        self.len(cx) == 0
    }

    pub fn stats(&self, _cx: &impl ExecContext) -> QueueStats {
        let ring = self.ring.lock();
        QueueStats {
            len: ring.count,
            capacity: self.capacity,
            pushed: ring.pushed,
            dropped: ring.dropped,
        }
    }
}
