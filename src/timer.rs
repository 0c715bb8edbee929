//! Timers ordered by eligible time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use slab::Slab;

use crate::{TaskId, TimerId, Timestamp};

/// A timer removed from the queue because it became eligible.
#[derive(Debug)]
pub struct Expired<T> {
    /// The timer's id.
    pub id: TimerId,

    /// The earliest time the timer was allowed to run.
    pub eligible_at: Timestamp,

    /// The scheduled work.
    pub payload: T,
}

/// A slot in the timer slab.
///
/// A cancelled timer keeps its slot with `payload` set to `None` until the heap reaches it.
struct Entry<T> {
    id: TimerId,
    payload: Option<T>,
}

/// A min-queue of timers keyed by `(eligible_at, id)`.
///
/// Equal eligible times run in scheduling order because ids increase monotonically.
/// Cancellation leaves a tombstone that is discarded when it reaches the front, or when
/// tombstones outnumber live timers and the heap is rebuilt.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Timestamp, TaskId, usize)>>,
    entries: Slab<Entry<T>>,
    live: HashMap<TimerId, usize>,
}

impl<T> TimerQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> TimerQueue<T> {
        TimerQueue {
            heap: BinaryHeap::new(),
            entries: Slab::new(),
            live: HashMap::new(),
        }
    }

    /// Queues `payload` to become eligible at `now + delay_ms`.
    ///
    /// A zero delay still queues; nothing here ever runs the payload.
    pub fn schedule(&mut self, id: TaskId, now: Timestamp, delay_ms: u64, payload: T) -> TimerId {
        let timer = TimerId::from(id);
        let eligible_at = now.saturating_add(delay_ms);
        let key = self.entries.insert(Entry {
            id: timer,
            payload: Some(payload),
        });
        self.heap.push(Reverse((eligible_at, id, key)));
        self.live.insert(timer, key);
        timer
    }

    /// Cancels a timer that has not run yet.
    ///
    /// Returns `false` if the timer already ran, was already cancelled, or never existed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.live.remove(&id) {
            Some(key) => {
                self.entries[key].payload = None;
                if self.entries.len() - self.live.len() > self.live.len() {
                    self.compact();
                }
                true
            }
            None => false,
        }
    }

    /// Removes the earliest timer if it is eligible at `now`.
    ///
    /// Never blocks: returns `None` when the earliest timer is still in the future.
    pub fn pop_ready(&mut self, now: Timestamp) -> Option<Expired<T>> {
        self.discard_tombstones();

        let Reverse((eligible_at, _, key)) = *self.heap.peek()?;
        if eligible_at > now {
            return None;
        }
        self.heap.pop();

        let entry = self.entries.remove(key);
        self.live.remove(&entry.id);
        entry.payload.map(|payload| Expired {
            id: entry.id,
            eligible_at,
            payload,
        })
    }

    /// Returns when the earliest live timer becomes eligible.
    pub fn next_eligible(&mut self) -> Option<Timestamp> {
        self.discard_tombstones();
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Number of live (not cancelled, not run) timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if no live timers remain.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drops cancelled entries sitting at the front of the heap.
    fn discard_tombstones(&mut self) {
        while let Some(&Reverse((_, _, key))) = self.heap.peek() {
            if self.entries[key].payload.is_some() {
                break;
            }
            self.heap.pop();
            self.entries.remove(key);
        }
    }

    /// Drops every tombstone, wherever it sits in the heap.
    fn compact(&mut self) {
        let entries = &self.entries;
        self.heap
            .retain(|Reverse((_, _, key))| entries[*key].payload.is_some());
        self.entries.retain(|_, entry| entry.payload.is_some());
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> TimerQueue<T> {
        TimerQueue::new()
    }
}

impl<T> fmt::Debug for TimerQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("live", &self.live.len())
            .field("tombstones", &(self.entries.len() - self.live.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sequence;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn earliest_first_with_fifo_ties() {
        let seq = Sequence::new();
        let mut q = TimerQueue::new();
        q.schedule(seq.next(), at(0), 10, "a");
        q.schedule(seq.next(), at(0), 5, "b");
        q.schedule(seq.next(), at(0), 5, "c");

        let order: Vec<_> = std::iter::from_fn(|| q.pop_ready(at(10)))
            .map(|t| t.payload)
            .collect();
        assert_eq!(order, ["b", "c", "a"]);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_ready_respects_eligibility() {
        let seq = Sequence::new();
        let mut q = TimerQueue::new();
        q.schedule(seq.next(), at(100), 0, 1);
        q.schedule(seq.next(), at(100), 50, 2);

        assert!(q.pop_ready(at(99)).is_none());
        assert_eq!(q.pop_ready(at(100)).map(|t| t.payload), Some(1));
        assert!(q.pop_ready(at(149)).is_none());
        assert_eq!(q.next_eligible(), Some(at(150)));

        let late = q.pop_ready(at(400)).unwrap();
        assert_eq!(late.payload, 2);
        assert_eq!(late.eligible_at, at(150));
    }

    #[test]
    fn cancel_leaves_tombstone() {
        let seq = Sequence::new();
        let mut q = TimerQueue::new();
        let first = q.schedule(seq.next(), at(0), 1, 'x');
        q.schedule(seq.next(), at(0), 2, 'y');

        assert!(q.cancel(first));
        assert!(!q.cancel(first));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_eligible(), Some(at(2)));

        let y = q.pop_ready(at(5)).unwrap();
        assert_eq!(y.payload, 'y');
        assert!(!q.cancel(y.id));
        assert!(q.pop_ready(at(5)).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn far_future_cancellations_do_not_pile_up() {
        let seq = Sequence::new();
        let mut q = TimerQueue::new();
        let kept = q.schedule(seq.next(), at(0), 50, "kept");

        // Debounce: each new timer replaces the previous one, far in the future.
        let mut pending = q.schedule(seq.next(), at(0), u64::MAX, "debounced");
        for _ in 0..1_000 {
            assert!(q.cancel(pending));
            pending = q.schedule(seq.next(), at(0), u64::MAX, "debounced");
        }

        assert_eq!(q.len(), 2);
        assert!(q.heap.len() <= 2 * q.len() + 1);
        assert!(q.entries.len() <= 2 * q.len() + 1);

        let first = q.pop_ready(at(50)).unwrap();
        assert_eq!(first.id, kept);
        assert!(q.cancel(pending));
        assert!(q.is_empty());
        assert_eq!(q.next_eligible(), None);
    }
}
