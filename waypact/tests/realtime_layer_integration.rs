//! Integration tests for the realtime data layer.
//!
//! These tests verify the complete flow including:
//! - platform fix → tracker → history → `location:update` events
//! - geofence verification against a real-world target
//! - remote-origin events routed through the same dispatch path
//! - query executor resilience feeding the metrics window
//!
//! Run with: `cargo test --test realtime_layer_integration`

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use waypact::channel::{
    BettingUpdateEvent, ChannelEvent, ConnectionState, EventKind, Transport, TransportError,
    WireMessage,
};
use waypact::geo::GeoPoint;
use waypact::location::{
    LocationError, LocationSample, LocationSource, LocationWatch, SessionContext, WatchEvent,
    WatchOptions,
};
use waypact::query::QueryOptions;
use waypact::service::RealtimeDataService;
use waypact::BoxFuture;

// ============================================================================
// Helper Functions
// ============================================================================

/// Times Square, the arrival target for the end-to-end scenario.
const TIMES_SQUARE: (f64, f64) = (40.7580, -73.9855);

/// A point near the Empire State Building, ~1.9 km from Times Square.
const MIDTOWN_EAST: (f64, f64) = (40.7489, -73.9680);

fn fix(lat: f64, lon: f64) -> LocationSample {
    LocationSample::new("replay", lat, lon, 8.0)
}

/// Location source replaying a scripted route.
struct ReplaySource {
    route: Mutex<Vec<WatchEvent>>,
}

impl ReplaySource {
    fn new(route: Vec<WatchEvent>) -> Self {
        Self {
            route: Mutex::new(route),
        }
    }
}

impl LocationSource for ReplaySource {
    fn watch(&self, _options: &WatchOptions) -> Result<LocationWatch, LocationError> {
        let route: Vec<WatchEvent> = self.route.lock().drain(..).collect();
        let (tx, rx) = mpsc::channel(route.len().max(1));
        let cancel = CancellationToken::new();

        let producer_cancel = cancel.clone();
        tokio::spawn(async move {
            for event in route {
                tokio::select! {
                    _ = producer_cancel.cancelled() => return,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(LocationWatch::new(rx, cancel))
    }

    fn current_position(
        &self,
        _options: &WatchOptions,
    ) -> BoxFuture<'_, Result<LocationSample, LocationError>> {
        Box::pin(async { Ok(fix(TIMES_SQUARE.0, TIMES_SQUARE.1)) })
    }
}

/// In-memory transport that records outbound traffic and lets the test play
/// the remote peer.
struct LoopbackTransport {
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<WireMessage>>,
    incoming_tx: mpsc::UnboundedSender<WireMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<WireMessage>>>,
}

impl LoopbackTransport {
    fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            sent: Mutex::new(Vec::new()),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    fn push_remote(&self, message: WireMessage) {
        let _ = self.incoming_tx.send(message);
    }

    fn sent_events(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.event.clone()).collect()
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            *self.state.lock() = ConnectionState::Connected;
            Ok(())
        })
    }

    fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<WireMessage>> {
        self.incoming_rx.lock().take()
    }

    fn disconnect(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }
}

fn build_service(route: Vec<WatchEvent>) -> (RealtimeDataService, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::new());
    let service = RealtimeDataService::new(Arc::new(ReplaySource::new(route)), transport.clone());
    (service, transport)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A runner arriving at Times Square: on-target samples verify within the
/// 50 m geofence, an off-target sample ~1.9 km away does not.
#[tokio::test]
async fn test_times_square_arrival_scenario() {
    waypact::log::init_with_filter("warn");

    let (service, transport) = build_service(vec![
        Ok(fix(MIDTOWN_EAST.0, MIDTOWN_EAST.1)),
        Ok(fix(40.7520, -73.9770)),
        Ok(fix(TIMES_SQUARE.0, TIMES_SQUARE.1)),
    ]);
    service.start().await.unwrap();

    let updates = Arc::new(AtomicUsize::new(0));
    let updates_clone = Arc::clone(&updates);
    let _sub = service
        .channel()
        .on(EventKind::LocationUpdate, move |event| {
            if let ChannelEvent::LocationUpdate(update) = event {
                assert_eq!(update.sample.subject_id, "runner-7");
                updates_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

    service
        .tracker()
        .start_tracking("runner-7", SessionContext::for_session("commitment-42"))
        .unwrap();
    settle().await;

    assert_eq!(updates.load(Ordering::SeqCst), 3);

    let target = GeoPoint::new(TIMES_SQUARE.0, TIMES_SQUARE.1).unwrap();

    // Final sample is on target: distance ~0, within the 50 m fence.
    let arrival = service.tracker().verify_target(target, 50.0).unwrap();
    assert!(arrival.within_threshold);
    assert!(arrival.distance_meters < 1.0);

    // The midtown sample, checked directly, is well outside the fence.
    let history = service.tracker().history();
    let departure = waypact::geo::verify(&history[0], target, 50.0);
    assert!(!departure.within_threshold);
    assert!(
        (1_500.0..2_100.0).contains(&departure.distance_meters),
        "expected ~1.9 km, got {} m",
        departure.distance_meters
    );

    // Updates and the verification reached the remote peer.
    let sent = transport.sent_events();
    assert_eq!(
        sent.iter().filter(|e| *e == "location:update").count(),
        3
    );
    assert!(sent.contains(&"location:verified".to_string()));

    service.stop();
}

/// Remote-origin business events are dispatched through the same local path
/// as optimistic local emissions.
#[tokio::test]
async fn test_remote_betting_events_reach_local_listeners() {
    let (service, transport) = build_service(Vec::new());
    service.start().await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let _sub = service
        .channel()
        .on(EventKind::BettingUpdate, move |event| {
            if let ChannelEvent::BettingUpdate(update) = event {
                received_clone.lock().push(update.bet_id.clone());
            }
        });

    // Server-confirmed update arrives over the wire.
    let remote = ChannelEvent::BettingUpdate(BettingUpdateEvent {
        commitment_id: "commitment-42".into(),
        bet_id: "bet-server".into(),
        amount: 20.0,
        prediction: true,
        odds: 1.6,
        timestamp: Utc::now(),
    });
    transport.push_remote(remote.to_wire().unwrap());

    // Optimistic local update is emitted before any confirmation.
    service.channel().emit(ChannelEvent::BettingUpdate(BettingUpdateEvent {
        commitment_id: "commitment-42".into(),
        bet_id: "bet-local".into(),
        amount: 5.0,
        prediction: false,
        odds: 2.4,
        timestamp: Utc::now(),
    }));

    settle().await;

    let seen = received.lock().clone();
    assert!(seen.contains(&"bet-server".to_string()));
    assert!(seen.contains(&"bet-local".to_string()));

    service.stop();
}

/// Local dispatch keeps working while the connection is down; nothing is
/// forwarded until the transport reports connected again.
#[tokio::test]
async fn test_offline_emissions_stay_local() {
    let (service, transport) = build_service(Vec::new());
    service.start().await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    let _sub = service
        .channel()
        .on(EventKind::BettingUpdate, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

    // Simulate a drop: the transport is mid-reconnect.
    *transport.state.lock() = ConnectionState::Connecting;

    service.channel().emit(ChannelEvent::BettingUpdate(BettingUpdateEvent {
        commitment_id: "c".into(),
        bet_id: "b".into(),
        amount: 1.0,
        prediction: true,
        odds: 2.0,
        timestamp: Utc::now(),
    }));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(transport.sent_events().is_empty());

    service.stop();
}

/// The executor's cache, retry, and metrics behavior observed end to end.
#[tokio::test]
async fn test_query_resilience_feeds_metrics() {
    let (service, _transport) = build_service(Vec::new());

    let template_fetches = Arc::new(AtomicU32::new(0));

    // Two cached reads: one miss, one hit.
    for _ in 0..2 {
        let fetches = Arc::clone(&template_fetches);
        let templates: Vec<String> = service
            .executor()
            .execute(
                "get_challenge_templates",
                move || {
                    let fetches = Arc::clone(&fetches);
                    async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(vec!["5k-run".to_string(), "commute".to_string()])
                    }
                },
                QueryOptions::cached("challenge_templates"),
            )
            .await
            .unwrap();
        assert_eq!(templates.len(), 2);
    }
    assert_eq!(template_fetches.load(Ordering::SeqCst), 1);

    // A write invalidates the cached list.
    let _: bool = service
        .executor()
        .execute(
            "create_challenge_template",
            || async { Ok::<_, String>(true) },
            QueryOptions::write(["challenge_templates"]),
        )
        .await
        .unwrap();

    // The next read misses again.
    let fetches = Arc::clone(&template_fetches);
    let _: Vec<String> = service
        .executor()
        .execute(
            "get_challenge_templates",
            move || {
                let fetches = Arc::clone(&fetches);
                async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec!["5k-run".to_string()])
                }
            },
            QueryOptions::cached("challenge_templates"),
        )
        .await
        .unwrap();
    assert_eq!(template_fetches.load(Ordering::SeqCst), 2);

    // A failing operation exhausts its (zero) retries and is recorded.
    let failed: Result<u32, _> = service
        .executor()
        .execute(
            "get_balance",
            || async { Err::<u32, _>("ledger offline".to_string()) },
            QueryOptions::default().with_max_retries(0),
        )
        .await;
    assert!(failed.is_err());

    let snapshot = service.metrics().snapshot();
    assert_eq!(snapshot.total_operations, 5);
    // One of five calls was a cache hit, one of five failed.
    assert_eq!(snapshot.cache_hit_rate_percent, 20.0);
    assert_eq!(snapshot.error_rate_percent, 20.0);
}

/// Stopping the service is a hard reset: tracking ends, listeners clear,
/// and the transport reports disconnected.
#[tokio::test]
async fn test_stop_is_a_hard_reset() {
    let (service, transport) = build_service(vec![Ok(fix(TIMES_SQUARE.0, TIMES_SQUARE.1))]);
    service.start().await.unwrap();

    let _sub = service.channel().on(EventKind::LocationUpdate, |_| {});
    service
        .tracker()
        .start_tracking("runner-7", SessionContext::default())
        .unwrap();
    settle().await;

    service.stop();

    assert!(!service.tracker().status().is_tracking);
    assert_eq!(
        service.channel().listener_count(EventKind::LocationUpdate),
        0
    );
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}
