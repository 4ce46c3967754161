//! Resilient query executor module
//!
//! Everything that talks to the backing store goes through
//! [`QueryExecutor::execute`]: cache-first lookup, timeout-bounded attempts,
//! bounded exponential-backoff retry, cache invalidation on writes, and a
//! metric per call. Callers describe the resilience they want through
//! [`QueryOptions`]; the executor owns the policy mechanics.
//!
//! # Example
//!
//! ```ignore
//! use waypact::query::{QueryExecutor, QueryOptions};
//!
//! let profile: Profile = executor
//!     .execute(
//!         "get_profile",
//!         || store.fetch_profile(user_id),
//!         QueryOptions::cached(format!("profile:{user_id}")),
//!     )
//!     .await?;
//! ```

mod cache;
mod coalescer;
mod executor;
mod types;

pub use cache::{QueryCache, DEFAULT_CACHE_CAPACITY};
pub use executor::{QueryExecutor, RetryPolicy};
pub use types::{
    QueryError, QueryOptions, QueryPriority, DEFAULT_CACHE_TTL, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT,
};
