//! WebSocket transport with automatic reconnection.
//!
//! Maintains one websocket session to the realtime backend at a time. When
//! a session drops, the transport transitions to `Connecting` and retries
//! with exponential backoff (1s doubling to a 60s cap) until the connection
//! is reestablished or the transport is torn down — there is no terminal
//! failure state while the process is alive. A periodic ping keeps
//! intermediate proxies from idling the connection out.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::events::WireMessage;
use crate::channel::transport::{ConnectionState, Transport, TransportError};
use crate::BoxFuture;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the websocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Initial reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Doubles the reconnect delay up to the configured cap.
fn next_reconnect_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// How a websocket session ended.
enum SessionEnd {
    /// The transport was torn down deliberately.
    Cancelled,
    /// The connection dropped and should be reestablished.
    Dropped(String),
}

/// Persistent websocket connection to the realtime backend.
pub struct WebSocketTransport {
    url: String,
    config: WebSocketConfig,
    state_tx: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<WireMessage>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<WireMessage>>>,
    incoming_tx: mpsc::UnboundedSender<WireMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<WireMessage>>>,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    /// Creates a transport for the given websocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, WebSocketConfig::default())
    }

    /// Creates a transport with explicit configuration.
    pub fn with_config(url: impl Into<String>, config: WebSocketConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        Self {
            url: url.into(),
            config,
            state_tx,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Watches connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn attempt_connect(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<WsStream, TransportError> {
        match tokio::time::timeout(connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(TransportError::Connection(e.to_string())),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Runs sessions until the transport is torn down, reconnecting with
    /// backoff whenever a session drops.
    async fn run(
        url: String,
        config: WebSocketConfig,
        mut stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<WireMessage>,
        incoming: mpsc::UnboundedSender<WireMessage>,
        state: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) {
        loop {
            let end = Self::run_session(
                stream,
                &mut outbound,
                &incoming,
                config.ping_interval,
                &cancel,
            )
            .await;

            match end {
                SessionEnd::Cancelled => {
                    state.send_replace(ConnectionState::Disconnected);
                    info!(url = %url, "websocket transport closed");
                    return;
                }
                SessionEnd::Dropped(reason) => {
                    state.send_replace(ConnectionState::Connecting);
                    warn!(url = %url, reason = %reason, "websocket dropped, reconnecting");
                }
            }

            // Reconnect with exponential backoff until a session comes up.
            let mut delay = config.reconnect_base;
            stream = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        state.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                match Self::attempt_connect(&url, config.connect_timeout).await {
                    Ok(stream) => {
                        state.send_replace(ConnectionState::Connected);
                        info!(url = %url, "websocket reconnected");
                        break stream;
                    }
                    Err(e) => {
                        delay = next_reconnect_delay(delay, config.reconnect_max);
                        warn!(
                            url = %url,
                            error = %e,
                            next_attempt_in = ?delay,
                            "websocket reconnect attempt failed"
                        );
                    }
                }
            };
        }
    }

    /// Runs one websocket session until it drops or the transport is
    /// cancelled.
    async fn run_session(
        stream: WsStream,
        outbound: &mut mpsc::UnboundedReceiver<WireMessage>,
        incoming: &mpsc::UnboundedSender<WireMessage>,
        ping_interval: Duration,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        let mut ping_timer = interval(ping_interval);
        // Skip the immediate first tick.
        ping_timer.tick().await;

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<WireMessage>(&text) {
                                Ok(wire) => {
                                    if incoming.send(wire).is_err() {
                                        // Receiver gone: the channel was torn
                                        // down without cancelling us yet.
                                        return SessionEnd::Cancelled;
                                    }
                                }
                                Err(e) => {
                                    debug!(error = %e, "ignoring unparseable frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Dropped(e.to_string());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Dropped(format!("close frame: {:?}", frame));
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Dropped(e.to_string());
                        }
                        None => {
                            return SessionEnd::Dropped("stream ended".into());
                        }
                        _ => {}
                    }
                }
                wire = outbound.recv() => {
                    match wire {
                        Some(message) => {
                            let text = match serde_json::to_string(&message) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!(event = %message.event, error = %e, "dropping unserializable message");
                                    continue;
                                }
                            };
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                return SessionEnd::Dropped(e.to_string());
                            }
                        }
                        None => return SessionEnd::Cancelled,
                    }
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                }
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
            }
        }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let outbound_rx = self
                .outbound_rx
                .lock()
                .take()
                .ok_or_else(|| TransportError::Connection("transport already started".into()))?;

            self.state_tx.send_replace(ConnectionState::Connecting);

            // The first attempt rejects on failure; only later drops are
            // absorbed by the reconnect loop.
            let stream = match Self::attempt_connect(&self.url, self.config.connect_timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                    *self.outbound_rx.lock() = Some(outbound_rx);
                    return Err(e);
                }
            };

            self.state_tx.send_replace(ConnectionState::Connected);
            info!(url = %self.url, "websocket connected");

            tokio::spawn(Self::run(
                self.url.clone(),
                self.config.clone(),
                stream,
                outbound_rx,
                self.incoming_tx.clone(),
                self.state_tx.clone(),
                self.cancel.clone(),
            ));

            Ok(())
        })
    }

    fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(message)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<WireMessage>> {
        self.incoming_rx.lock().take()
    }

    fn disconnect(&self) {
        self.cancel.cancel();
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}
