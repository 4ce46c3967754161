//! Waypact realtime core
//!
//! The resilient realtime data layer behind Waypact, the app where users
//! stake value on arriving somewhere by a deadline and friends bet on the
//! outcome. Two halves, one theme — do I/O that is slow and unreliable, but
//! let the rest of the app see it as fast and reliable:
//!
//! - **Location streaming**: [`location::LocationTracker`] consumes the
//!   platform's location primitive through an injectable seam, keeps a
//!   bounded sample history, checks geofence arrival via [`geo::verify`],
//!   and republishes everything as typed events on the
//!   [`channel::RealtimeChannel`] — a reconnecting transport with
//!   optimistic local dispatch.
//! - **Resilient queries**: [`query::QueryExecutor`] wraps backing-store
//!   operations with cache-first lookup, per-attempt timeouts, bounded
//!   exponential-backoff retry, and write-time cache invalidation, with
//!   every call observed by the [`metrics::MetricsAggregator`].
//!
//! [`service::RealtimeDataService`] assembles both halves behind an
//! explicit start/stop lifecycle.

use std::future::Future;
use std::pin::Pin;

pub mod channel;
pub mod geo;
pub mod location;
pub mod log;
pub mod metrics;
pub mod query;
pub mod service;

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use channel::{ChannelEvent, EventKind, RealtimeChannel, WebSocketTransport};
pub use geo::{GeoPoint, VerificationResult};
pub use location::{LocationSample, LocationTracker, SessionContext};
pub use metrics::MetricsAggregator;
pub use query::{QueryExecutor, QueryOptions};
pub use service::RealtimeDataService;
