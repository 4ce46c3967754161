//! Location streaming module
//!
//! Owns everything between the platform's location primitive and the
//! realtime channel: the injectable [`LocationSource`] seam, the bounded
//! sample [`history`], and the [`LocationTracker`] session manager that
//! normalizes fixes and republishes them as `location:update` events.
//!
//! # Data Flow
//!
//! ```text
//! LocationSource ──► LocationTracker ──► LocationHistory
//!                         │
//!                         └──► RealtimeChannel (location:update / :error)
//! ```

mod history;
mod source;
mod tracker;
mod types;

pub use history::{LocationHistory, DEFAULT_HISTORY_CAPACITY};
pub use source::{LocationSource, LocationWatch, WatchEvent};
pub use tracker::{LocationTracker, TrackerConfig};
pub use types::{
    LocationError, LocationSample, SessionContext, TrackingStatus, WatchOptions,
    DEFAULT_MAX_SAMPLE_AGE, DEFAULT_POSITION_TIMEOUT,
};

#[cfg(test)]
pub(crate) use source::tests::ScriptedSource;
