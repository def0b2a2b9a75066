// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deadline-ordered timer queue.

use alloc::collections::BinaryHeap;
use core::cmp::Reverse;

use hashbrown::HashMap;

/// Handle to a scheduled timer.
///
/// Handles are never reused within one [`TimerQueue`], so a stale handle
/// cannot cancel an unrelated timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(u64);

impl TimerId {
    /// Returns the raw sequence number of this timer.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A queue of payloads ordered by deadline.
///
/// Timers with equal deadlines fire in the order they were scheduled.
/// Cancellation is O(1); cancelled entries are discarded lazily.
///
/// # Example
///
/// ```
/// use understory_timing::TimerQueue;
///
/// let mut timers = TimerQueue::new();
/// let a = timers.schedule(10, 'a');
/// timers.schedule(10, 'b');
/// assert!(timers.is_pending(a));
///
/// assert_eq!(timers.pop_due(9), None);
/// assert_eq!(timers.pop_due(10).map(|(_, p)| p), Some('a'));
/// assert_eq!(timers.pop_due(10).map(|(_, p)| p), Some('b'));
/// assert!(timers.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    /// Min-heap of `(deadline, sequence)`.
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    /// Live payloads by sequence; absent entries in `heap` are cancelled.
    live: HashMap<u64, (u64, T)>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `payload` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: u64, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq)));
        self.live.insert(seq, (deadline, payload));
        TimerId(seq)
    }

    /// Cancels a pending timer, returning its payload.
    ///
    /// Returns `None` if the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let (_, payload) = self.live.remove(&id.0)?;
        self.prune();
        Some(payload)
    }

    /// Returns `true` if the timer has neither fired nor been cancelled.
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.live.contains_key(&id.0)
    }

    /// Returns the deadline of a pending timer.
    #[must_use]
    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.live.get(&id.0).map(|(deadline, _)| *deadline)
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Removes and returns the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<(TimerId, T)> {
        let Reverse((deadline, seq)) = *self.heap.peek()?;
        if deadline > now {
            return None;
        }
        self.heap.pop();
        let fired = self.live.remove(&seq).map(|(_, payload)| (TimerId(seq), payload));
        self.prune();
        fired
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Cancels every pending timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Drops cancelled entries from the top of the heap so that
    /// `next_deadline` always reports a live timer.
    fn prune(&mut self) {
        while let Some(Reverse((_, seq))) = self.heap.peek() {
            if self.live.contains_key(seq) {
                break;
            }
            self.heap.pop();
        }
    }
}
