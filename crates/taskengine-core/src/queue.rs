//! Bounded, per-priority dispatch queues.
//!
//! Each [`Priority`] class gets its own bounded FIFO channel. Keeping the
//! classes physically separate (rather than one queue ordered by a
//! priority key) is what makes strict priority dispatch at dequeue time
//! cheap: the worker loop simply polls `Critical` before `High` before
//! `Normal` before `Low`.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::task::{Descriptor, Priority};

/// One bounded FIFO channel per priority class.
pub(crate) struct QueueSet {
    senders: [Sender<Descriptor>; 4],
    receivers: [Receiver<Descriptor>; 4],
}

/// Returned when a priority class's queue is at capacity.
pub(crate) struct QueueFull(pub Descriptor);

impl QueueSet {
    /// `capacities` gives each priority class its own bound, in
    /// `[CRITICAL, HIGH, NORMAL, LOW]` order (see
    /// [`crate::config::EngineConfig::queue_capacities`]).
    pub(crate) fn new(capacities: [usize; 4]) -> Self {
        let mut senders = Vec::with_capacity(4);
        let mut receivers = Vec::with_capacity(4);
        for p in Priority::ALL {
            let (tx, rx) = channel::bounded(capacities[p.index()].max(1));
            senders.push(tx);
            receivers.push(rx);
        }
        Self {
            senders: senders.try_into().unwrap_or_else(|_| unreachable!()),
            receivers: receivers.try_into().unwrap_or_else(|_| unreachable!()),
        }
    }

    /// Enqueues `descriptor` onto its priority's queue. Never blocks.
    pub(crate) fn try_push(&self, descriptor: Descriptor) -> Result<(), QueueFull> {
        let idx = descriptor.priority.index();
        match self.senders[idx].try_send(descriptor) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(d)) => Err(QueueFull(d)),
            Err(TrySendError::Disconnected(d)) => Err(QueueFull(d)),
        }
    }

    /// Number of tasks currently queued, per priority class, in dispatch
    /// order (`Critical, High, Normal, Low`).
    pub(crate) fn lengths(&self) -> [usize; 4] {
        let mut out = [0usize; 4];
        for p in Priority::ALL {
            out[p.index()] = self.receivers[p.index()].len();
        }
        out
    }

    /// Receivers in dispatch order, for use with `crossbeam::channel::Select`.
    pub(crate) fn receivers(&self) -> &[Receiver<Descriptor>; 4] {
        &self.receivers
    }

    /// Non-blocking priority-ordered pop: tries `Critical` first, then
    /// `High`, `Normal`, `Low`. Returns `None` if every queue is empty.
    pub(crate) fn try_pop_highest(&self) -> Option<Descriptor> {
        for p in Priority::ALL {
            if let Ok(d) = self.receivers[p.index()].try_recv() {
                return Some(d);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ResultCell, TaskId};
    use std::sync::Arc;

    fn descriptor(priority: Priority) -> Descriptor {
        Descriptor {
            id: TaskId::from_raw(0),
            priority,
            body: Box::new(|_| Ok(Arc::new(()))),
            max_retries: 0,
            timeout: None,
            cell: ResultCell::new(TaskId::from_raw(0), priority),
        }
    }

    #[test]
    fn strict_priority_ordering_at_pop() {
        let queues = QueueSet::new([8; 4]);
        queues.try_push(descriptor(Priority::Low)).ok().unwrap();
        queues.try_push(descriptor(Priority::Normal)).ok().unwrap();
        queues.try_push(descriptor(Priority::Critical)).ok().unwrap();
        queues.try_push(descriptor(Priority::High)).ok().unwrap();

        let order: Vec<Priority> = (0..4)
            .map(|_| queues.try_pop_highest().unwrap().priority)
            .collect();
        assert_eq!(
            order,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn fifo_within_a_priority_class() {
        let queues = QueueSet::new([8; 4]);
        for i in 0..3u64 {
            let mut d = descriptor(Priority::Normal);
            d.id = TaskId::from_raw(i);
            queues.try_push(d).ok().unwrap();
        }
        let order: Vec<u64> = (0..3)
            .map(|_| queues.try_pop_highest().unwrap().id.as_u64())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn push_rejected_when_at_capacity() {
        let queues = QueueSet::new([1; 4]);
        queues.try_push(descriptor(Priority::High)).ok().unwrap();
        let err = queues.try_push(descriptor(Priority::High));
        assert!(err.is_err());
    }

    #[test]
    fn pop_returns_none_when_all_empty() {
        let queues = QueueSet::new([4; 4]);
        assert!(queues.try_pop_highest().is_none());
    }
}
