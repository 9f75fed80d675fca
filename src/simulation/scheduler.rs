//! Discrete-event queue.
//!
//! Events are popped in time order; events scheduled for the same instant are
//! popped in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::types::SimTime;

/// An event scheduled for execution at a specific simulation time.
#[derive(Debug, Clone)]
pub struct ScheduledEvent<E> {
    time: SimTime,
    event: E,
    sequence: u64,
}

impl<E> ScheduledEvent<E> {
    /// When the event fires.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Consume the entry and return its payload.
    pub fn into_event(self) -> E {
        self.event
    }
}

impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: reverse so the earliest (time, sequence) wins
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of pending events.
///
/// Ties on time are broken by a monotonically increasing sequence number, so
/// the pop order is fully determined by the order of `schedule` calls.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<ScheduledEvent<E>>,
    next_sequence: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Queue `event` at `time`. Events at the same time keep insertion order.
    pub fn schedule(&mut self, time: SimTime, event: E) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent { time, event, sequence });
    }

    /// Remove and return the earliest event, or `None` once the queue is empty.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent<E>> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
