//! Realtime channel module
//!
//! Combines a persistent, reconnecting transport with a typed local pub-sub
//! bus. Local listeners are notified synchronously on every emission,
//! independent of whether the remote peer is currently reachable — the
//! "optimistic local dispatch" guarantee: local state updates never wait on
//! a network round-trip.
//!
//! # Architecture
//!
//! ```text
//! emit(event) ──┬── connected? ──► Transport ──► remote peer
//!               └── always ──► EventBus ──► local listeners (sync)
//!
//! remote peer ──► Transport ──► decode ──► EventBus (same dispatch path)
//! ```

mod bus;
mod events;
mod transport;
mod websocket;

pub use bus::{EventBus, Listener, Subscription};
pub use events::{
    AchievementUnlockedEvent, BettingPlacedEvent, BettingUpdateEvent, ChannelEvent,
    EventDecodeError, EventKind, LocationErrorEvent, LocationUpdateEvent, ReputationChangedEvent,
    SessionCompletedEvent, WireMessage,
};
pub use transport::{ConnectionState, Transport, TransportError};
pub use websocket::{WebSocketConfig, WebSocketTransport};

#[cfg(test)]
pub(crate) use transport::tests::FakeTransport;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Typed pub-sub over a persistent connection.
///
/// Explicitly constructed and owned by the caller (application bootstrap or
/// a test); there is no process-wide instance.
pub struct RealtimeChannel {
    transport: Arc<dyn Transport>,
    bus: EventBus,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Creates a channel over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            bus: EventBus::new(),
            pump: Mutex::new(None),
        }
    }

    /// Establishes the transport connection and starts routing
    /// remote-origin messages into the local bus.
    ///
    /// Resolves once the transport reports connected; rejects if the initial
    /// attempt fails. Later connection drops are handled by the transport's
    /// reconnect loop and are not visible here.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await?;

        if let Some(mut incoming) = self.transport.take_incoming() {
            let bus = self.bus.clone();
            let handle = tokio::spawn(async move {
                while let Some(wire) = incoming.recv().await {
                    match ChannelEvent::from_wire(&wire) {
                        Ok(event) => {
                            debug!(kind = %event.kind(), "dispatching remote event");
                            bus.dispatch(&event);
                        }
                        Err(e) => {
                            warn!(event = %wire.event, error = %e, "dropping undecodable remote event");
                        }
                    }
                }
            });
            *self.pump.lock() = Some(handle);
        }

        Ok(())
    }

    /// Registers a listener for an event kind.
    ///
    /// The returned [`Subscription`] removes exactly this listener.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, listener)
    }

    /// Publishes an event.
    ///
    /// Forwards to the remote peer when connected (a non-blocking enqueue),
    /// then unconditionally and synchronously notifies all local listeners.
    /// Emission never fails: remote forwarding problems are logged and local
    /// dispatch proceeds regardless.
    pub fn emit(&self, event: ChannelEvent) {
        if self.transport.state() == ConnectionState::Connected {
            match event.to_wire() {
                Ok(wire) => {
                    if let Err(e) = self.transport.send(wire) {
                        warn!(kind = %event.kind(), error = %e, "remote forward failed");
                    }
                }
                Err(e) => {
                    warn!(kind = %event.kind(), error = %e, "event not serializable for remote peer");
                }
            }
        }

        self.bus.dispatch(&event);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.bus.listener_count(kind)
    }

    /// Tears down the transport and clears every registered listener.
    ///
    /// A hard reset, not a pause: the channel is done after this call.
    pub fn disconnect(&self) {
        self.transport.disconnect();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        self.bus.clear();
        info!("realtime channel disconnected");
    }
}
