//! Timer queue
//!
//! A cancellable delayed-callback primitive driven by a virtual clock.
//!
//! The queue never sleeps or spawns threads. The host moves time forward
//! (from its event loop, or a test moves it explicitly) and pops the timers
//! that became due, in deadline order. Each scheduled timer carries a typed
//! payload that tells the host what to do when it fires.
//!
//! ```rust
//! use vigil_core::timer::TimerQueue;
//!
//! let mut timers = TimerQueue::new();
//! let poll = timers.schedule(500, "poll");
//! let _retry = timers.schedule(200, "retry");
//!
//! // Cancelled timers never fire
//! timers.cancel(poll);
//!
//! let fired = timers.pop_due(1_000).unwrap();
//! assert_eq!(fired.payload, "retry");
//! assert_eq!(timers.now(), 200);
//! assert!(timers.pop_due(1_000).is_none());
//! ```

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a scheduled timer
    pub struct TimerId;
}

impl TimerId {
    /// Convert to raw u64 (for logging and diagnostics)
    pub fn to_raw(self) -> u64 {
        self.0.as_ffi()
    }
}

/// Internal timer storage
struct Timer<T> {
    /// Absolute virtual time (ms) at which the timer fires
    deadline: u64,
    /// Insertion order, breaks ties between equal deadlines
    seq: u64,
    payload: T,
}

/// A timer that became due
#[derive(Debug)]
pub struct Fired<T> {
    pub id: TimerId,
    pub deadline: u64,
    pub payload: T,
}

/// Queue of one-shot timers on a virtual millisecond clock
pub struct TimerQueue<T> {
    timers: SlotMap<TimerId, Timer<T>>,
    now: u64,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    /// Create an empty queue with the clock at zero
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an empty queue with the clock at `now`
    pub fn starting_at(now: u64) -> Self {
        Self {
            timers: SlotMap::with_key(),
            now,
            next_seq: 0,
        }
    }

    /// Current virtual time in milliseconds
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `payload` to fire `delay_ms` from now
    pub fn schedule(&mut self, delay_ms: u64, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.insert(Timer {
            deadline: self.now.saturating_add(delay_ms),
            seq,
            payload,
        })
    }

    /// Cancel a pending timer, returning its payload
    ///
    /// Cancelling a timer that already fired (or was already cancelled)
    /// is a no-op and returns `None`.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.timers.remove(id).map(|timer| timer.payload)
    }

    /// Check whether a timer is still pending
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.contains_key(id)
    }

    /// Deadline of a pending timer
    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.timers.get(id).map(|timer| timer.deadline)
    }

    /// Payload of a pending timer
    pub fn payload(&self, id: TimerId) -> Option<&T> {
        self.timers.get(id).map(|timer| &timer.payload)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.values().map(|timer| timer.deadline).min()
    }

    /// Pop the earliest timer whose deadline is at or before `until`
    ///
    /// The clock moves forward to the popped timer's deadline (never
    /// backwards), so code reacting to the timer observes the time it was
    /// due at. Timers with equal deadlines fire in scheduling order.
    pub fn pop_due(&mut self, until: u64) -> Option<Fired<T>> {
        let id = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= until)
            .min_by_key(|(_, timer)| (timer.deadline, timer.seq))
            .map(|(id, _)| id)?;

        let timer = self.timers.remove(id)?;
        self.now = self.now.max(timer.deadline);
        Some(Fired {
            id,
            deadline: timer.deadline,
            payload: timer.payload,
        })
    }

    /// Move the clock forward to `until` without firing anything
    pub fn advance_to(&mut self, until: u64) {
        self.now = self.now.max(until);
    }

    /// Keep only the timers whose payload matches the predicate
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.timers.retain(|_, timer| keep(&timer.payload));
    }

    /// Drop every pending timer
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
