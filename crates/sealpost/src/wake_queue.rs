//! Bounded wake-up queue for the delivery worker.
//!
//! Producers (queueing a message, a forced flush, a reconnect) push a [`WakeReason`] and unpark the worker. The queue is a lock-free
//! `crossbeam-queue::ArrayQueue`; when it is full the wake is coalesced
//! into the ones already waiting, since the worker drains everything on
//! each wake anyway.

use crossbeam_queue::ArrayQueue;

/// Why the delivery worker was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeReason {
    /// A record was added to the outbox.
    Enqueued,
    /// A caller asked for an immediate pass.
    Forced,
    /// The connection came back.
    Reconnected,
}

/// Result of pushing a wake reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    Queued,
    /// The queue was full; an earlier wake will cover this one.
    Coalesced,
}

#[derive(Debug)]
pub struct WakeQueue {
    inner: ArrayQueue<WakeReason>,
}

impl WakeQueue {
    /// Creates a queue holding up to `capacity` pending wakes. A zero
    /// capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn push(&self, reason: WakeReason) -> WakeOutcome {
        match self.inner.push(reason) {
            Ok(()) => WakeOutcome::Queued,
            Err(_) => WakeOutcome::Coalesced,
        }
    }

    /// Takes every pending wake, oldest first.
    pub fn drain(&self) -> Vec<WakeReason> {
        let mut reasons = Vec::with_capacity(self.inner.len());
        while let Some(reason) = self.inner.pop() {
            reasons.push(reason);
        }
        reasons
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_push_order() {
        let q = WakeQueue::new(4);
        assert_eq!(q.push(WakeReason::Enqueued), WakeOutcome::Queued);
        assert_eq!(q.push(WakeReason::Forced), WakeOutcome::Queued);

        assert_eq!(q.drain(), vec![WakeReason::Enqueued, WakeReason::Forced]);
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_coalesces() {
        let q = WakeQueue::new(2);
        q.push(WakeReason::Enqueued);
        q.push(WakeReason::Enqueued);

        assert_eq!(q.push(WakeReason::Forced), WakeOutcome::Coalesced);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_empties_a_full_queue() {
        let q = WakeQueue::new(1);
        q.push(WakeReason::Enqueued);
        q.push(WakeReason::Forced);

        assert_eq!(q.drain(), vec![WakeReason::Enqueued]);
        assert!(q.drain().is_empty());
        assert_eq!(q.push(WakeReason::Forced), WakeOutcome::Queued);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let q = WakeQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert_eq!(q.push(WakeReason::Reconnected), WakeOutcome::Queued);
    }
}
