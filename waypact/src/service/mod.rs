//! Realtime data service orchestrator.
//!
//! `RealtimeDataService` wires the tracker, channel, executor, and metrics
//! together behind one explicit `start()`/`stop()` lifecycle owned by the
//! application bootstrap. Instances are constructed, never ambient: tests
//! create as many isolated services as they need and nothing leaks between
//! them.
//!
//! # Startup Sequence
//!
//! 1. The caller constructs the platform source and transport.
//! 2. `start()` connects the channel (remote events begin flowing).
//! 3. The caller starts tracking sessions and issues queries as needed.
//! 4. `stop()` ends tracking and tears the channel down.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::{RealtimeChannel, Transport, TransportError};
use crate::location::{LocationSource, LocationTracker, TrackerConfig};
use crate::metrics::MetricsAggregator;
use crate::query::{QueryExecutor, RetryPolicy};

/// Default interval between cache maintenance sweeps.
pub const DEFAULT_CACHE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Tracker configuration (history bound, one-shot options).
    pub tracker: TrackerConfig,
    /// Retry schedule for the query executor.
    pub retry: RetryPolicy,
    /// Interval between cache maintenance sweeps.
    pub cache_maintenance_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            retry: RetryPolicy::default(),
            cache_maintenance_interval: DEFAULT_CACHE_MAINTENANCE_INTERVAL,
        }
    }
}

/// Errors surfaced by the service lifecycle.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The channel's initial connection attempt failed.
    #[error("failed to connect realtime channel: {0}")]
    Connect(#[from] TransportError),
}

/// Owns the realtime data layer for one application instance.
pub struct RealtimeDataService {
    channel: Arc<RealtimeChannel>,
    tracker: Arc<LocationTracker>,
    executor: Arc<QueryExecutor>,
    metrics: Arc<MetricsAggregator>,
    maintenance_interval: Duration,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RealtimeDataService {
    /// Builds a service over the given platform source and transport.
    pub fn new(source: Arc<dyn LocationSource>, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(source, transport, ServiceConfig::default())
    }

    /// Builds a service with explicit configuration.
    pub fn with_config(
        source: Arc<dyn LocationSource>,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
    ) -> Self {
        let metrics = Arc::new(MetricsAggregator::new());
        let channel = Arc::new(RealtimeChannel::new(transport));
        let tracker = Arc::new(LocationTracker::with_config(
            source,
            Arc::clone(&channel),
            config.tracker,
        ));
        let executor = Arc::new(QueryExecutor::with_policy(
            Arc::clone(&metrics),
            config.retry,
        ));

        Self {
            channel,
            tracker,
            executor,
            metrics,
            maintenance_interval: config.cache_maintenance_interval,
            maintenance: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Connects the realtime channel.
    ///
    /// Resolves once the transport reports connected; the transport keeps
    /// the connection alive (reconnecting on drops) from then on.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.channel.connect().await?;

        // Periodic sweep of expired cache entries; expiration itself is
        // enforced lazily on every read.
        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.clone();
        let interval = self.maintenance_interval;
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = timer.tick() => executor.run_cache_maintenance().await,
                }
            }
        });
        *self.maintenance.lock() = Some(handle);

        info!("realtime data service started");
        Ok(())
    }

    /// Stops tracking and tears the channel down.
    ///
    /// A hard stop: listeners are cleared and the transport is done. Safe
    /// to call regardless of what was started.
    pub fn stop(&self) {
        self.tracker.stop_tracking();
        self.channel.disconnect();
        self.shutdown.cancel();
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        info!("realtime data service stopped");
    }

    /// The pub-sub channel.
    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    /// The location tracker.
    pub fn tracker(&self) -> &Arc<LocationTracker> {
        &self.tracker
    }

    /// The query executor.
    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    /// The metrics aggregator observing the executor.
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }
}
