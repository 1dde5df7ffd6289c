//! corral-bus -- in-process broadcast of task lifecycle events.

use std::sync::{Arc, Mutex};

use corral_core::types::TaskEvent;
use tracing::warn;

/// Default per-subscriber queue depth when none is configured.
const DEFAULT_CAPACITY: usize = 256;

/// A broadcast-style event bus built on top of bounded flume channels.
///
/// Each call to [`subscribe`](EventBus::subscribe) creates a new receiver
/// that will receive every event published after the subscription was
/// created; there is no replay of history. Publishing never blocks: a
/// subscriber whose queue is full is disconnected rather than stalling
/// publishers (drop-slow-subscriber, not drop-event-for-everyone).
///
/// The bus is thread-safe and cheap to clone (it wraps its internals in an
/// `Arc`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<TaskEvent>>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default subscriber queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscribers each get a queue of `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<TaskEvent> {
        let (tx, rx) = flume::bounded(self.capacity);
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish an event to all current subscribers.
    ///
    /// Subscribers that have disconnected, or whose queue is full, are
    /// pruned from the bus.
    pub fn publish(&self, event: TaskEvent) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        let before = senders.len();
        senders.retain(|tx| tx.try_send(event.clone()).is_ok());
        let dropped = before - senders.len();
        if dropped > 0 {
            warn!(
                dropped,
                kind = %event.kind,
                "disconnected slow or closed event subscribers"
            );
        }
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::types::EventKind;
    use uuid::Uuid;

    fn event(kind: EventKind) -> TaskEvent {
        TaskEvent::new(kind, Uuid::new_v4(), None)
    }

    #[test]
    fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(event(EventKind::Created));
        bus.publish(event(EventKind::Dispatched));

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Created);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Dispatched);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(event(EventKind::Created));

        let rx = bus.subscribe();
        assert!(rx.try_recv().is_err());

        bus.publish(event(EventKind::Done));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Done);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(event(EventKind::Created));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn slow_subscriber_disconnected_not_publisher_blocked() {
        let bus = EventBus::with_capacity(2);
        let slow = bus.subscribe();
        let other = bus.subscribe();

        // Neither subscriber drains, so both queues are full after two
        // publishes; the third overflows and disconnects them.
        bus.publish(event(EventKind::Created));
        bus.publish(event(EventKind::Running));
        bus.publish(event(EventKind::Done));

        assert_eq!(bus.subscriber_count(), 0);
        // Queued events up to the overflow are still readable.
        assert_eq!(slow.try_recv().unwrap().kind, EventKind::Created);
        assert_eq!(other.try_recv().unwrap().kind, EventKind::Created);
    }

    #[test]
    fn draining_subscriber_survives() {
        let bus = EventBus::with_capacity(2);
        let rx = bus.subscribe();

        for _ in 0..10 {
            bus.publish(event(EventKind::Created));
            rx.try_recv().unwrap();
        }
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn clone_shares_subscribers() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let other = bus.clone();
        other.publish(event(EventKind::Cancelled));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Cancelled);
    }
}
