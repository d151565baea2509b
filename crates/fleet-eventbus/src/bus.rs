use tokio::sync::broadcast;

use crate::event::Event;

/// In-process pub/sub by topic, synchronous delivery in the publishing
/// thread. Subscribers receive every event ever published after they
/// subscribe and are expected to filter on `Event::topic` themselves — the
/// bus does not do per-topic routing, it is a single broadcast channel, same
/// as the one the orchestrator's own event bus uses.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4096);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes `event`. A publish with no subscribers is not an error —
    /// the bus has shared ownership across components and not every
    /// component necessarily cares about every topic.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
