//! Optional observer hook.
//!
//! Events are not required for correctness — nothing in the engine blocks
//! on a subscriber draining its channel, and a lagged subscriber simply
//! misses the events it fell behind on. This mirrors the teacher's IPC bus:
//! a broadcast channel of reference-counted payloads that publishers never
//! wait on.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::task::TaskId;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One observable occurrence in a task's or the engine's lifecycle.
#[derive(Debug, Clone)]
pub enum Event {
    TaskSubmitted { task_id: TaskId, at: Instant },
    TaskStarted { task_id: TaskId, at: Instant },
    TaskCompleted { task_id: TaskId, status: &'static str, at: Instant },
    TaskRetryScheduled { task_id: TaskId, retry_count: u32, at: Instant },
    TaskCancelled { task_id: TaskId, at: Instant },
    EngineStarted { at: Instant },
    EngineStopping { at: Instant },
    EngineStopped { at: Instant },
}

/// Broadcast bus for [`Event`]s. Cheap to clone; every clone shares the
/// same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes `event` to all current subscribers. A no-op (not an
    /// error) if nobody is subscribed.
    pub(crate) fn publish(&self, event: Event) {
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribes to future events. Events published before this call are
    /// never delivered to this receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::EngineStarted { at: Instant::now() });

        let event = rx.recv().await.unwrap();
        assert!(matches!(*event, Event::EngineStarted { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::EngineStopped { at: Instant::now() });
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(Event::EngineStarted { at: Instant::now() });
        let mut rx = bus.subscribe();
        bus.publish(Event::EngineStopping { at: Instant::now() });

        let event = rx.recv().await.unwrap();
        assert!(matches!(*event, Event::EngineStopping { .. }));
    }
}
