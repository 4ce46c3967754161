//! Platform location primitive abstraction.
//!
//! `LocationSource` is the seam between the realtime layer and whatever the
//! platform provides for geolocation (mobile OS APIs, a GPS daemon, a
//! simulator feed). Injecting it at construction time keeps the tracker
//! fully testable with a deterministic fake.
//!
//! # Dyn Compatibility
//!
//! The one-shot method returns `Pin<Box<dyn Future>>` so the trait supports
//! trait objects (`Arc<dyn LocationSource>`).

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::location::{LocationError, LocationSample, WatchOptions};
use crate::BoxFuture;

/// A single event from a continuous watch: a fresh sample or a classified
/// platform error.
pub type WatchEvent = Result<LocationSample, LocationError>;

/// Handle to an active continuous watch.
///
/// Exactly one of these exists per tracking session. Dropping the handle
/// (or calling [`LocationWatch::stop`]) releases the underlying platform
/// watch deterministically.
pub struct LocationWatch {
    updates: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
}

impl LocationWatch {
    /// Creates a watch handle from an update channel and the token that
    /// releases the platform resource when cancelled.
    pub fn new(updates: mpsc::Receiver<WatchEvent>, cancel: CancellationToken) -> Self {
        Self { updates, cancel }
    }

    /// Receives the next watch event.
    ///
    /// Returns `None` once the source has stopped producing events.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.updates.recv().await
    }

    /// Releases the platform watch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Abstraction over the platform's location-sensing primitive.
///
/// Implementations must classify failures into the `LocationError` taxonomy;
/// the rest of the system relies on exactly those kinds.
pub trait LocationSource: Send + Sync {
    /// Starts a continuous position watch.
    ///
    /// # Errors
    ///
    /// - `LocationError::Unsupported` if no location primitive exists
    /// - `LocationError::PermissionDenied` if the platform reports denial
    fn watch(&self, options: &WatchOptions) -> Result<LocationWatch, LocationError>;

    /// Acquires a single position fix, independent of any active watch.
    ///
    /// Implementations should respect `options.timeout` and
    /// `options.max_sample_age` where the platform supports them; the
    /// tracker additionally races the call against its own timer.
    fn current_position(
        &self,
        options: &WatchOptions,
    ) -> BoxFuture<'_, Result<LocationSample, LocationError>>;
}
