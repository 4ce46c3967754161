//! Options and errors for the resilient query executor.

use std::time::Duration;

use thiserror::Error;

/// Default TTL for cached results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(300_000);

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Scheduling hint carried on options.
///
/// Tags log lines and metrics so slow-operation reports can be read in
/// context; it does not influence execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl QueryPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPriority::Low => "low",
            QueryPriority::Normal => "normal",
            QueryPriority::High => "high",
        }
    }
}

/// Per-call configuration for [`QueryExecutor::execute`].
///
/// All fields have documented defaults: caching off, 5 minute TTL, 30 second
/// timeout, 2 retries, coalescing off.
///
/// [`QueryExecutor::execute`]: crate::query::QueryExecutor::execute
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Consult and populate the cache for this operation.
    pub cache: bool,
    /// How long a cached result stays live.
    pub cache_ttl: Duration,
    /// Cache key; defaults to the operation name when unset.
    pub cache_key: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Scheduling hint for logs and metrics.
    pub priority: QueryPriority,
    /// Share one in-flight execution among concurrent same-key callers.
    ///
    /// Off by default: without it, concurrent misses for the same key each
    /// run the operation independently, which is acceptable for idempotent
    /// reads.
    pub coalesce: bool,
    /// Cache keys to drop after this operation succeeds. Write-style
    /// operations must name the keys they make stale.
    pub invalidate_keys: Vec<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache: false,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_key: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: QueryPriority::Normal,
            coalesce: false,
            invalidate_keys: Vec::new(),
        }
    }
}

impl QueryOptions {
    /// Options for a cached read under the given key.
    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            cache: true,
            cache_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Options for a write that invalidates the given keys on success.
    pub fn write(invalidate_keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            invalidate_keys: invalidate_keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the priority hint.
    pub fn with_priority(mut self, priority: QueryPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Opts in to request coalescing.
    pub fn coalesced(mut self) -> Self {
        self.coalesce = true;
        self
    }

    /// The effective cache key for the given operation name.
    pub(crate) fn effective_key(&self, operation: &str) -> String {
        self.cache_key
            .clone()
            .unwrap_or_else(|| operation.to_string())
    }
}

/// Errors surfaced by the query executor after retry exhaustion.
///
/// Transient failures are retried transparently; callers only see the last
/// error after the final attempt. Clone-able so coalesced followers can
/// observe the leader's outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The final attempt did not complete within the configured timeout.
    #[error("operation `{operation}` timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The final attempt failed.
    #[error("operation `{operation}` failed: {message}")]
    Failed { operation: String, message: String },

    /// A result could not be moved through the cache or a coalesced hand-off.
    #[error("operation `{operation}` produced an unserializable result: {message}")]
    Codec { operation: String, message: String },
}
