//! Location tracking session manager.
//!
//! Owns the lifecycle of one tracking session: starting and stopping the
//! platform watch, normalizing samples into history, and republishing each
//! fix on the realtime channel. While a session is active exactly one
//! platform watch handle exists; `start_tracking` is idempotent and
//! `stop_tracking` is always safe to call.
//!
//! The per-sample path never suspends: it updates in-memory state under
//! short critical sections and hands the event to the channel, whose local
//! dispatch is synchronous and whose remote forward is a non-blocking
//! enqueue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, LocationErrorEvent, LocationUpdateEvent, RealtimeChannel};
use crate::geo::{self, GeoPoint, VerificationResult};
use crate::location::history::{LocationHistory, DEFAULT_HISTORY_CAPACITY};
use crate::location::source::{LocationSource, LocationWatch};
use crate::location::{LocationError, LocationSample, SessionContext, TrackingStatus, WatchOptions};

/// Configuration for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Bound on the sample history buffer.
    pub history_capacity: usize,
    /// Watch options used for one-shot position requests.
    pub position_options: WatchOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            position_options: WatchOptions::default(),
        }
    }
}

/// State held while a tracking session is active.
struct ActiveSession {
    subject_id: String,
    started_at: Instant,
    cancel: CancellationToken,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

/// Manages one device's tracking session and republishes its fixes.
pub struct LocationTracker {
    source: Arc<dyn LocationSource>,
    channel: Arc<RealtimeChannel>,
    config: TrackerConfig,
    history: Arc<Mutex<LocationHistory>>,
    last_sample: Arc<Mutex<Option<LocationSample>>>,
    active: Arc<Mutex<Option<ActiveSession>>>,
}

impl LocationTracker {
    /// Creates a tracker over the given source and channel.
    pub fn new(source: Arc<dyn LocationSource>, channel: Arc<RealtimeChannel>) -> Self {
        Self::with_config(source, channel, TrackerConfig::default())
    }

    /// Creates a tracker with explicit configuration.
    pub fn with_config(
        source: Arc<dyn LocationSource>,
        channel: Arc<RealtimeChannel>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            source,
            channel,
            history: Arc::new(Mutex::new(LocationHistory::new(config.history_capacity))),
            config,
            last_sample: Arc::new(Mutex::new(None)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a tracking session for `subject_id`.
    ///
    /// Idempotent: calling while a session is active is a no-op and does
    /// not open a second platform watch.
    ///
    /// # Errors
    ///
    /// - `LocationError::Unsupported` when no location primitive exists
    /// - `LocationError::PermissionDenied` when the platform reports denial
    pub fn start_tracking(
        &self,
        subject_id: &str,
        context: SessionContext,
    ) -> Result<(), LocationError> {
        let mut active = self.active.lock();
        if let Some(session) = active.as_ref() {
            debug!(
                subject_id = %session.subject_id,
                "tracking already active, ignoring start request"
            );
            return Ok(());
        }

        let watch = match self.source.watch(&context.watch) {
            Ok(watch) => watch,
            Err(e) => {
                self.publish_error(&e);
                return Err(e);
            }
        };

        let started_at = Instant::now();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Self::consume_watch(
            watch,
            subject_id.to_string(),
            started_at,
            Arc::clone(&self.history),
            Arc::clone(&self.last_sample),
            Arc::clone(&self.channel),
            Arc::clone(&self.active),
            cancel.clone(),
        ));

        info!(
            subject_id,
            session_id = context.session_id.as_deref().unwrap_or("-"),
            high_accuracy = context.watch.high_accuracy,
            "tracking started"
        );

        *active = Some(ActiveSession {
            subject_id: subject_id.to_string(),
            started_at,
            cancel,
            task,
        });

        Ok(())
    }

    /// Stops the active tracking session, releasing the platform watch.
    ///
    /// Safe to call at any time, including when not tracking.
    pub fn stop_tracking(&self) {
        let session = self.active.lock().take();
        match session {
            Some(session) => {
                session.cancel.cancel();
                info!(
                    subject_id = %session.subject_id,
                    duration = ?session.started_at.elapsed(),
                    "tracking stopped"
                );
            }
            None => {
                debug!("stop requested with no active session");
            }
        }
    }

    /// Acquires a single position fix, independent of any active stream.
    ///
    /// # Errors
    ///
    /// `LocationError::Timeout` when no fix arrives in time, or whatever
    /// classified error the platform reports. Failures are also published
    /// as `location:error` events for passive observers.
    pub async fn current_position(&self) -> Result<LocationSample, LocationError> {
        let options = self.config.position_options.clone();

        let outcome =
            match tokio::time::timeout(options.timeout, self.source.current_position(&options))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LocationError::Timeout(options.timeout)),
            };

        if let Err(e) = &outcome {
            warn!(error = %e, "one-shot position request failed");
            self.publish_error(e);
        }

        outcome
    }

    /// Verifies the last known position against a geofence target and
    /// publishes the result as `location:verified`.
    ///
    /// # Errors
    ///
    /// `LocationError::Unavailable` when no sample has arrived yet.
    pub fn verify_target(
        &self,
        target: GeoPoint,
        threshold_m: f64,
    ) -> Result<VerificationResult, LocationError> {
        let sample = self
            .last_sample
            .lock()
            .clone()
            .ok_or_else(|| LocationError::Unavailable("no position fix yet".to_string()))?;

        let result = geo::verify(&sample, target, threshold_m);
        debug!(
            distance_m = format!("{:.1}", result.distance_meters),
            within = result.within_threshold,
            "geofence verified"
        );

        self.channel.emit(ChannelEvent::LocationVerified(result));
        Ok(result)
    }

    /// Snapshot of the tracker's state.
    pub fn status(&self) -> TrackingStatus {
        let active = self.active.lock();
        TrackingStatus {
            is_tracking: active.is_some(),
            last_sample: self.last_sample.lock().clone(),
            history_size: self.history.lock().len(),
            tracking_duration: active
                .as_ref()
                .map(|s| s.started_at.elapsed())
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Copies of the recorded samples in arrival order.
    pub fn history(&self) -> Vec<LocationSample> {
        self.history.lock().snapshot()
    }

    /// Consumes watch events until the session is cancelled or the source
    /// stops producing.
    #[allow(clippy::too_many_arguments)]
    async fn consume_watch(
        mut watch: LocationWatch,
        subject_id: String,
        started_at: Instant,
        history: Arc<Mutex<LocationHistory>>,
        last_sample: Arc<Mutex<Option<LocationSample>>>,
        channel: Arc<RealtimeChannel>,
        active: Arc<Mutex<Option<ActiveSession>>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    watch.stop();
                    return;
                }
                event = watch.next() => {
                    match event {
                        Some(Ok(mut sample)) => {
                            sample.subject_id = subject_id.clone();

                            let derived_track_deg = {
                                let mut history = history.lock();
                                history.push(sample.clone());
                                history.derived_track_deg()
                            };
                            *last_sample.lock() = Some(sample.clone());

                            channel.emit(ChannelEvent::LocationUpdate(LocationUpdateEvent {
                                sample,
                                tracking_duration_ms: started_at.elapsed().as_millis() as u64,
                                derived_track_deg,
                            }));
                        }
                        Some(Err(e)) => {
                            warn!(subject_id = %subject_id, error = %e, "watch reported error");
                            channel.emit(ChannelEvent::LocationError(LocationErrorEvent {
                                code: e.code().to_string(),
                                message: e.to_string(),
                                timestamp: Utc::now(),
                            }));
                        }
                        None => {
                            debug!(subject_id = %subject_id, "watch stream ended");
                            // The platform stopped producing; the session is
                            // over even though nobody called stop.
                            *active.lock() = None;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn publish_error(&self, error: &LocationError) {
        self.channel
            .emit(ChannelEvent::LocationError(LocationErrorEvent {
                code: error.code().to_string(),
                message: error.to_string(),
                timestamp: Utc::now(),
            }));
    }
}
