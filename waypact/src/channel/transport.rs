//! Transport abstraction for the realtime channel.
//!
//! A transport owns one persistent connection to the remote peer. The
//! channel talks to it through this trait so the reconnect machinery can be
//! swapped for an in-memory fake in tests.
//!
//! # Connection State Machine
//!
//! ```text
//! Disconnected --[connect()]--> Connecting --[handshake ok]--> Connected
//! Connected --[drop]--> Connecting (transport retries indefinitely)
//! any state --[disconnect()]--> Disconnected (terminal for this instance)
//! ```
//!
//! A dropped connection is not an error visible to callers; the transport
//! transitions state and keeps retrying while the process is alive.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::events::WireMessage;
use crate::BoxFuture;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A connection attempt (initial or reconnect) is in flight.
    Connecting,
    /// The remote peer is reachable.
    Connected,
}

impl ConnectionState {
    /// User-facing status string.
    pub fn display_status(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Offline",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Live",
        }
    }
}

/// Errors surfaced by transports.
///
/// Only the initial `connect()` attempt rejects; later connection drops are
/// absorbed by the reconnect loop and observable via `state()`.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The initial connection attempt failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The initial connection attempt did not complete in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// A message could not be handed to the connection.
    #[error("send failed: {0}")]
    Send(String),

    /// Send was attempted while the transport is not connected.
    #[error("transport is not connected")]
    NotConnected,
}

/// A persistent, reconnecting connection to the remote peer.
///
/// Uses `Pin<Box<dyn Future>>` for the async method so the channel can hold
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Establishes the connection.
    ///
    /// Resolves once the transport first reports connected; rejects if the
    /// initial attempt fails. After a successful return the transport keeps
    /// itself connected, re-entering `Connecting` on drops.
    fn connect(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Enqueues a message for the remote peer without blocking.
    fn send(&self, message: WireMessage) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Takes the stream of remote-origin messages.
    ///
    /// Yields `Some` exactly once; the channel owns the receiver afterwards.
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<WireMessage>>;

    /// Tears the connection down. Terminal for this transport instance.
    fn disconnect(&self);
}
