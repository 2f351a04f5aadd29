//! In-process publish/subscribe for controller notifications.
//!
//! Delivery is synchronous on the publishing thread, in registration order.
//! A subscriber that returns an error is logged and skipped; it never aborts
//! delivery to the remaining subscribers and never reaches the controller.
//!
//! Handlers run while the bus lock is held, so they must be quick and must
//! not call back into the bus.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::core::EmitterState;

/// Event categories a subscriber can register for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChange,
    PowerUpdate,
}

/// Typed notification payloads published by the controller.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EmitterEvent {
    /// The controller moved between lifecycle states.
    StateChange {
        old: EmitterState,
        new: EmitterState,
        timestamp: DateTime<Utc>,
    },
    /// The output power setpoint changed while emitting.
    PowerUpdate { power_w: f64 },
}

impl EmitterEvent {
    /// The category this event is delivered under.
    pub fn kind(&self) -> EventKind {
        match self {
            EmitterEvent::StateChange { .. } => EventKind::StateChange,
            EmitterEvent::PowerUpdate { .. } => EventKind::PowerUpdate,
        }
    }
}

/// Subscriber callback. Errors are isolated and logged by the bus.
pub type EventHandler = Box<dyn Fn(&EmitterEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    channels: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
}

/// Ordered, isolated-failure fan-out of controller events.
///
/// Cloning is cheap; clones share the same subscriber lists, which lets the
/// deferred auto-stop task publish through the same bus as the controller.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Subscriptions persist until
    /// explicitly removed.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.channels.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a subscription. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        for handlers in inner.channels.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sub_id, _)| *sub_id == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver an event to every subscriber of its kind, in registration
    /// order, on the calling thread.
    pub fn publish(&self, event: &EmitterEvent) {
        let inner = self.lock();
        let Some(handlers) = inner.channels.get(&event.kind()) else {
            return;
        };
        for (id, handler) in handlers {
            if let Err(err) = handler(event) {
                warn!(subscription = id.0, %err, "event subscriber failed");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        // A poisoned lock only means a subscriber panicked; the lists stay usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn power_event(power_w: f64) -> EmitterEvent {
        EmitterEvent::PowerUpdate { power_w }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                EventKind::PowerUpdate,
                Box::new(move |_| {
                    seen.lock().unwrap().push(tag);
                    Ok(())
                }),
            );
        }

        bus.publish(&power_event(1.0e-9));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_subscriber_does_not_abort_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        bus.subscribe(
            EventKind::PowerUpdate,
            Box::new(|_| Err(anyhow!("subscriber exploded"))),
        );
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            EventKind::PowerUpdate,
            Box::new(move |_| {
                *seen_clone.lock().unwrap() += 1;
                Ok(())
            }),
        );

        bus.publish(&power_event(2.0e-9));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_clone = Arc::clone(&seen);
        let id = bus.subscribe(
            EventKind::PowerUpdate,
            Box::new(move |_| {
                *seen_clone.lock().unwrap() += 1;
                Ok(())
            }),
        );

        bus.publish(&power_event(1.0e-9));
        assert!(bus.unsubscribe(id));
        bus.publish(&power_event(1.0e-9));
        assert!(!bus.unsubscribe(id));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_events_are_routed_by_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            EventKind::StateChange,
            Box::new(move |_| {
                *seen_clone.lock().unwrap() += 1;
                Ok(())
            }),
        );

        bus.publish(&power_event(1.0e-9));
        assert_eq!(*seen.lock().unwrap(), 0);

        bus.publish(&EmitterEvent::StateChange {
            old: EmitterState::Off,
            new: EmitterState::Standby,
            timestamp: Utc::now(),
        });
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
