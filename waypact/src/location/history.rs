//! Bounded history of location samples.
//!
//! Maintains an append-only FIFO of the most recent samples for one tracking
//! session. When the buffer is full the oldest entry is evicted silently;
//! running out of room is never an error. The history also derives a ground
//! track from position deltas for platforms that do not report heading.

use std::collections::VecDeque;

use crate::geo;
use crate::location::LocationSample;

/// Default maximum samples to retain.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Minimum distance in meters between oldest and newest sample before a
/// derived track is considered reliable.
const MIN_TRACK_DISTANCE_M: f64 = 25.0;

/// Bounded FIFO of recent location samples, oldest first.
///
/// Owned exclusively by one `LocationTracker` per active session; readers
/// get copies, never references into the buffer.
#[derive(Debug)]
pub struct LocationHistory {
    samples: VecDeque<LocationSample>,
    capacity: usize,
}

impl Default for LocationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LocationHistory {
    /// Creates a history bounded at `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample, evicting the oldest entry when full.
    pub fn push(&mut self, sample: LocationSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<&LocationSample> {
        self.samples.back()
    }

    /// Copies of all samples in arrival order.
    pub fn snapshot(&self) -> Vec<LocationSample> {
        self.samples.iter().cloned().collect()
    }

    /// Derives a ground track from the oldest and newest samples.
    ///
    /// Returns `None` with fewer than two samples or when the positions are
    /// too close together for the bearing to be meaningful.
    pub fn derived_track_deg(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }

        let oldest = self.samples.front()?.point();
        let newest = self.samples.back()?.point();

        if geo::haversine_distance_m(oldest, newest) < MIN_TRACK_DISTANCE_M {
            return None;
        }

        Some(geo::bearing_deg(oldest, newest))
    }

    /// Removes all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
