//! Local pub-sub event bus.
//!
//! Listeners are registered per event kind and notified synchronously, in
//! registration order, on every emission — independent of connection state.
//! The listener set is snapshotted before each dispatch so subscribing or
//! unsubscribing from inside a handler never corrupts iteration, and a
//! panicking listener is isolated and logged without affecting its siblings.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::events::{ChannelEvent, EventKind};

/// A registered event listener.
pub type Listener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Handle returned from every subscription.
///
/// Removes exactly the listener it was created for; dropping it without
/// calling [`Subscription::unsubscribe`] leaves the listener registered.
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// The event kind this subscription listens for.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the listener from the bus.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock();
            if let Some(entries) = registry.listeners.get_mut(&self.kind) {
                entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

/// Synchronous local dispatch for channel events.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for an event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// The listener set is snapshotted under the lock, then invoked without
    /// it, so handlers may freely subscribe or unsubscribe.
    pub fn dispatch(&self, event: &ChannelEvent) {
        let snapshot: Vec<(u64, Listener)> = {
            let registry = self.registry.lock();
            registry
                .listeners
                .get(&event.kind())
                .map(|entries| entries.clone())
                .unwrap_or_default()
        };

        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if let Err(payload) = outcome {
                let message = panic_message(&payload);
                tracing::error!(
                    kind = %event.kind(),
                    listener_id = id,
                    panic = %message,
                    "event listener panicked; continuing with remaining listeners"
                );
            }
        }
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .listeners
            .get(&kind)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.registry.lock().listeners.clear();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
