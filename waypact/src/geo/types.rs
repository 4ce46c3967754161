//! Geographic types shared across the realtime layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;

/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;

/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Mean Earth radius in meters, as used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Errors produced when constructing geographic values from raw input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    /// Latitude outside the valid [-90, 90] range.
    #[error("invalid latitude: {0} (must be between -90 and 90)")]
    InvalidLatitude(f64),

    /// Longitude outside the valid [-180, 180] range.
    #[error("invalid longitude: {0} (must be between -180 and 180)")]
    InvalidLongitude(f64),
}

/// A geographic coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a validated geographic point.
    ///
    /// # Errors
    ///
    /// Returns `GeoError` if either coordinate is outside its valid range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if !(MIN_LAT..=MAX_LAT).contains(&latitude) {
            return Err(GeoError::InvalidLatitude(latitude));
        }
        if !(MIN_LON..=MAX_LON).contains(&longitude) {
            return Err(GeoError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Result of checking a position against a geofence target.
///
/// Derived on demand from the latest sample; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// The geofence center.
    pub target: GeoPoint,
    /// The position that was checked.
    pub current: GeoPoint,
    /// Great-circle distance between `current` and `target` in meters.
    pub distance_meters: f64,
    /// Whether `distance_meters <= threshold` (boundary inclusive).
    pub within_threshold: bool,
    /// Reported accuracy of the checked sample in meters.
    pub accuracy: f64,
}
