//! Keyed retransmission timers.
//!
//! One time-ordered priority queue per entity, keyed by
//! `(TimerKind, sequence number)`, with cancel-by-key. All timers carry a
//! strict deadline; the owner drains due entries with [`TimerQueue::pop_due`]
//! and dispatches on the kind. Single-threaded: a cancellation always
//! happens-before any later firing.

use std::{cmp::Reverse, time::Instant};

use keyed_priority_queue::KeyedPriorityQueue;

use crate::utils::Seq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Per-fragment retransmission timeout, keyed by fragment seq num.
    FragRetx,
    /// Window-advance request timeout, keyed by the request's own seq num.
    AdvanceRetx,
    /// Periodic receiver status report; key is unused (always seq 0).
    StatusReport,
}

pub struct TimerQueue {
    queue: KeyedPriorityQueue<(TimerKind, Seq), Reverse<Instant>>,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        TimerQueue {
            queue: KeyedPriorityQueue::new(),
        }
    }

    /// Arms (or re-arms) the timer for `(kind, key)`.
    pub fn schedule(&mut self, kind: TimerKind, key: Seq, deadline: Instant) {
        self.queue.push((kind, key), Reverse(deadline));
    }

    /// Disarms the timer. Returns whether it was pending.
    pub fn cancel(&mut self, kind: TimerKind, key: Seq) -> bool {
        self.queue.remove(&(kind, key)).is_some()
    }

    #[must_use]
    pub fn busy(&self, kind: TimerKind, key: Seq) -> bool {
        self.queue.get_priority(&(kind, key)).is_some()
    }

    /// Pops the earliest timer whose deadline is at or before `now`.
    #[must_use]
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerKind, Seq)> {
        let (_, &Reverse(deadline)) = self.queue.peek()?;
        if deadline > now {
            return None;
        }
        let ((kind, key), _) = self.queue.pop().unwrap();
        Some((kind, key))
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.peek().map(|(_, prio)| prio.0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue = KeyedPriorityQueue::new();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::utils::Seq;

    use super::{TimerKind, TimerQueue};

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        timers.schedule(TimerKind::FragRetx, Seq::from_u32(1), now + Duration::from_millis(20));
        timers.schedule(TimerKind::FragRetx, Seq::from_u32(0), now + Duration::from_millis(10));

        assert!(timers.pop_due(now).is_none());

        let later = now + Duration::from_millis(30);
        assert_eq!(
            timers.pop_due(later),
            Some((TimerKind::FragRetx, Seq::from_u32(0)))
        );
        assert_eq!(
            timers.pop_due(later),
            Some((TimerKind::FragRetx, Seq::from_u32(1)))
        );
        assert!(timers.pop_due(later).is_none());
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        timers.schedule(TimerKind::AdvanceRetx, Seq::from_u32(3), now);
        assert!(timers.busy(TimerKind::AdvanceRetx, Seq::from_u32(3)));

        assert!(timers.cancel(TimerKind::AdvanceRetx, Seq::from_u32(3)));
        assert!(!timers.busy(TimerKind::AdvanceRetx, Seq::from_u32(3)));
        assert!(timers.pop_due(now + Duration::from_secs(1)).is_none());

        // canceling an idle timer is a no-op
        assert!(!timers.cancel(TimerKind::AdvanceRetx, Seq::from_u32(3)));
    }

    #[test]
    fn reschedule_replaces_deadline() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        timers.schedule(TimerKind::FragRetx, Seq::from_u32(0), now + Duration::from_millis(10));
        timers.schedule(TimerKind::FragRetx, Seq::from_u32(0), now + Duration::from_millis(50));

        assert!(timers.pop_due(now + Duration::from_millis(20)).is_none());
        assert!(timers.pop_due(now + Duration::from_millis(50)).is_some());
        assert!(timers.is_empty());
    }
}
