//! Request coalescing for concurrent identical queries.
//!
//! When enabled, the first caller to miss on a key becomes the *leader* and
//! runs the operation; callers arriving while it is in flight become
//! *followers* and wait for the leader's result instead of running their
//! own copy. Coalescing is best-effort: a follower that loses the race
//! between leader completion and hand-off simply becomes a new leader.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::query::QueryError;

type InFlightMap = Arc<DashMap<String, broadcast::Sender<Result<Value, QueryError>>>>;

/// Outcome of joining an in-flight key.
pub(crate) enum Coalesce {
    /// This caller runs the operation and publishes the result.
    Leader(CoalesceGuard),
    /// Another caller is already running it; wait here.
    Follower(broadcast::Receiver<Result<Value, QueryError>>),
}

/// Leadership over one in-flight key.
///
/// The leader must call [`CoalesceGuard::publish`]; if it is dropped
/// without publishing (cancellation, panic), followers receive a closed
/// channel and fail over to reporting the abandonment.
pub(crate) struct CoalesceGuard {
    key: String,
    sender: Option<broadcast::Sender<Result<Value, QueryError>>>,
    in_flight: InFlightMap,
}

impl CoalesceGuard {
    /// Hands the leader's outcome to every follower and releases the key.
    pub(crate) fn publish(mut self, result: Result<Value, QueryError>) {
        self.in_flight.remove(&self.key);
        if let Some(sender) = self.sender.take() {
            // No receivers is fine: there were simply no followers.
            let _ = sender.send(result);
        }
    }
}

impl Drop for CoalesceGuard {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.in_flight.remove(&self.key);
        }
    }
}

/// Tracks in-flight operations by cache key.
#[derive(Default)]
pub(crate) struct RequestCoalescer {
    in_flight: InFlightMap,
}

impl RequestCoalescer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Joins the in-flight set for `key`, becoming leader or follower.
    pub(crate) fn join(&self, key: &str) -> Coalesce {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(key, "coalescing onto in-flight operation");
                Coalesce::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                entry.insert(sender.clone());
                Coalesce::Leader(CoalesceGuard {
                    key: key.to_string(),
                    sender: Some(sender),
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
        }
    }
}
