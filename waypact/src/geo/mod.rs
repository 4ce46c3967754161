//! Geofence verification module
//!
//! Provides great-circle distance and containment checks between geographic
//! coordinates. All functions here are pure: no I/O, no clocks, and the same
//! inputs always produce the same outputs, which keeps the module
//! property-testable.

mod types;

pub use types::{
    GeoError, GeoPoint, VerificationResult, EARTH_RADIUS_M, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON,
};

use crate::location::LocationSample;

/// Computes the great-circle distance between two points in meters.
///
/// Uses the haversine formula with a mean Earth radius of 6,371,000 m.
/// The result is always >= 0 and symmetric in its arguments.
#[inline]
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let dphi = (b.latitude - a.latitude).to_radians();
    let dlambda = (b.longitude - a.longitude).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);

    // Clamp guards against floating-point drift pushing sqrt input past 1.0
    // for antipodal points.
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Computes the initial great-circle bearing from `a` to `b`.
///
/// Returns degrees in [0, 360), where 0 = North and 90 = East. Used to derive
/// a ground track from consecutive position samples when the platform does
/// not report heading.
#[inline]
pub fn bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let dlambda = (b.longitude - a.longitude).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();

    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}

/// Checks a location sample against a circular geofence.
///
/// `within_threshold` is true when the great-circle distance from the sample
/// to `target` is less than or equal to `threshold_m` (boundary inclusive).
/// The caller is responsible for publishing the result as a
/// `location:verified` event.
#[inline]
pub fn verify(current: &LocationSample, target: GeoPoint, threshold_m: f64) -> VerificationResult {
    let position = current.point();
    let distance_meters = haversine_distance_m(position, target);

    VerificationResult {
        target,
        current: position,
        distance_meters,
        within_threshold: distance_meters <= threshold_m,
        accuracy: current.accuracy,
    }
}
