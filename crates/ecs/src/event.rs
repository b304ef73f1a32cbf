//! Forcing event queue
//!
//! Events are ordered by `(time, sequence)` where the sequence number is the
//! insertion order, so ties drain in the order they were scheduled. Draining
//! removes events, so nothing is delivered twice. An event scheduled for a
//! time that has already been drained is still delivered on the next drain,
//! flagged as late. Event times must be finite.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{error, trace, warn};

use crate::component::{Component, ComponentKind};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::Value;

/// A timestamped forcing value for one entity's component.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub target: Entity,
    pub kind: ComponentKind,
    pub value: Value,
    pub time: f64,
}

impl Event {
    pub fn new(target: Entity, kind: ComponentKind, value: impl Into<Value>, time: f64) -> Self {
        Self {
            target,
            kind,
            value: value.into(),
            time,
        }
    }

    /// Event targeting component kind `C`.
    pub fn to<C: Component>(target: Entity, value: impl Into<Value>, time: f64) -> Self {
        Self::new(target, ComponentKind::of::<C>(), value, time)
    }
}

/// An event handed out by [`EventQueue::drain_due`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedEvent {
    pub event: Event,
    /// Scheduled for a time that had already been drained.
    pub late: bool,
    /// Insertion sequence number, unique per queue.
    pub sequence: u64,
}

struct Pending {
    event: Event,
    sequence: u64,
    late: bool,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the earliest (time, sequence) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time
            .total_cmp(&self.event.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Time-ordered queue of forcing events.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Pending>,
    next_sequence: u64,
    last_drain: Option<f64>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event. Returns its sequence number.
    ///
    /// A NaN or infinite time is rejected as a configuration error and the
    /// queue is left unchanged.
    pub fn schedule(&mut self, event: Event) -> Result<u64> {
        if !event.time.is_finite() {
            error!(
                target_entity = %event.target,
                kind = %event.kind,
                time = event.time,
                "event time rejected"
            );
            return Err(Error::InvalidConfig(format!(
                "event for {} on {} has non-finite time {}",
                event.target, event.kind, event.time
            )));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let late = self.last_drain.is_some_and(|t| event.time <= t);
        if late {
            warn!(
                target_entity = %event.target,
                kind = %event.kind,
                time = event.time,
                "event scheduled for an already drained time"
            );
        }
        trace!(sequence, time = event.time, "event scheduled");
        self.heap.push(Pending {
            event,
            sequence,
            late,
        });
        Ok(sequence)
    }

    /// Remove and return every event with `time <= now`, ordered by
    /// `(time, insertion order)`.
    pub fn drain_due(&mut self, now: f64) -> Vec<DrainedEvent> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|p| p.event.time <= now) {
            if let Some(pending) = self.heap.pop() {
                due.push(DrainedEvent {
                    event: pending.event,
                    late: pending.late,
                    sequence: pending.sequence,
                });
            }
        }
        self.last_drain = Some(self.last_drain.map_or(now, |t| t.max(now)));
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Time of the earliest pending event.
    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|p| p.event.time)
    }

    /// Latest time passed to [`drain_due`](Self::drain_due).
    pub fn last_drain(&self) -> Option<f64> {
        self.last_drain
    }
}
