//! Location sample and tracking session types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

/// Default timeout for a single position request.
pub const DEFAULT_POSITION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum age of a cached platform fix that may be returned
/// instead of acquiring a fresh one.
pub const DEFAULT_MAX_SAMPLE_AGE: Duration = Duration::from_secs(30);

/// Errors reported by location sources and the tracker.
///
/// The platform primitive classifies failures into exactly three kinds
/// (permission denied, position unavailable, timeout); `Unsupported` covers
/// the case where no location primitive exists at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// The platform reported that location permission was denied.
    #[error("location permission denied")]
    PermissionDenied,

    /// The platform could not produce a position fix.
    #[error("position unavailable: {0}")]
    Unavailable(String),

    /// No fix arrived within the configured timeout.
    #[error("location request timed out after {0:?}")]
    Timeout(Duration),

    /// No location primitive exists on this platform.
    #[error("no location source available on this platform")]
    Unsupported,
}

impl LocationError {
    /// Stable machine-readable code carried on `location:error` events.
    pub fn code(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => "permission_denied",
            LocationError::Unavailable(_) => "position_unavailable",
            LocationError::Timeout(_) => "timeout",
            LocationError::Unsupported => "unsupported",
        }
    }
}

/// Options passed to the platform location primitive.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Request the highest-accuracy fix the platform can provide.
    pub high_accuracy: bool,
    /// Maximum time to wait for a single fix.
    pub timeout: Duration,
    /// Maximum age of a cached fix the platform may return.
    pub max_sample_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_POSITION_TIMEOUT,
            max_sample_age: DEFAULT_MAX_SAMPLE_AGE,
        }
    }
}

/// Context for one tracking session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Identifier of the arrival commitment this session belongs to, if any.
    pub session_id: Option<String>,
    /// Platform watch options for this session.
    pub watch: WatchOptions,
}

impl SessionContext {
    /// Creates a session context for the given commitment id.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            watch: WatchOptions::default(),
        }
    }
}

/// A single geolocation fix.
///
/// Immutable once produced. Coordinates and accuracy are always present;
/// kinematic fields are optional because not all platforms report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// The user this fix belongs to.
    pub subject_id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Reported accuracy radius in meters.
    pub accuracy: f64,
    /// When the fix was produced.
    pub timestamp: DateTime<Utc>,
    /// Ground speed in m/s, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees from north, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Altitude in meters, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Altitude accuracy in meters, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
}

impl LocationSample {
    /// Creates a sample with the required fields and no kinematic data.
    pub fn new(subject_id: impl Into<String>, latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            subject_id: subject_id.into(),
            latitude,
            longitude,
            accuracy,
            timestamp: Utc::now(),
            speed: None,
            heading: None,
            altitude: None,
            altitude_accuracy: None,
        }
    }

    /// The sample's coordinates as a `GeoPoint`.
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Snapshot of the tracker's state, returned by `LocationTracker::status()`.
#[derive(Debug, Clone)]
pub struct TrackingStatus {
    /// Whether a tracking session is currently active.
    pub is_tracking: bool,
    /// The most recent sample, if any has arrived.
    pub last_sample: Option<LocationSample>,
    /// Number of samples currently held in history.
    pub history_size: usize,
    /// Elapsed time since tracking started (zero when not tracking).
    pub tracking_duration: Duration,
}
