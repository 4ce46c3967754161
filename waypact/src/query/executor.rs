//! Cache-first, retrying query executor.
//!
//! Wraps arbitrary read/write operations against the backing store so the
//! rest of the system sees slow, unreliable I/O as fast and reliable:
//!
//! 1. Cache-first: a live cached entry short-circuits the call entirely.
//! 2. Each attempt races a timeout; a timed-out attempt counts as failed.
//! 3. Failed attempts retry with exponential backoff up to the bound.
//! 4. Successful results populate the cache and drop written-over keys.
//! 5. Every call records one metric, hit or miss, success or failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::{MetricsAggregator, QueryMetric};
use crate::query::cache::QueryCache;
use crate::query::coalescer::{Coalesce, RequestCoalescer};
use crate::query::{QueryError, QueryOptions};

/// Backoff schedule for failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt` (0-based):
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        doubled.min(self.max_delay)
    }
}

/// Resilient executor for backing-store operations.
///
/// Holds the result cache and records a [`QueryMetric`] for every call.
/// Construct one per service instance; there is no process-wide executor.
pub struct QueryExecutor {
    cache: QueryCache,
    coalescer: RequestCoalescer,
    metrics: Arc<MetricsAggregator>,
    policy: RetryPolicy,
}

impl QueryExecutor {
    /// Creates an executor with the default cache and retry policy.
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self::with_policy(metrics, RetryPolicy::default())
    }

    /// Creates an executor with an explicit retry policy.
    pub fn with_policy(metrics: Arc<MetricsAggregator>, policy: RetryPolicy) -> Self {
        Self {
            cache: QueryCache::default(),
            coalescer: RequestCoalescer::new(),
            metrics,
            policy,
        }
    }

    /// The metrics aggregator observing this executor.
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Drops the cached entry at `key`.
    ///
    /// Normally invalidation happens through `QueryOptions::invalidate_keys`
    /// on the write itself; this hook covers externally observed changes.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Sweeps expired cache entries.
    ///
    /// Expiration is already observed lazily on read; this periodic sweep
    /// only reclaims memory held by entries nobody reads again.
    pub async fn run_cache_maintenance(&self) {
        self.cache.run_pending_maintenance().await;
    }

    /// Executes `thunk` under the resilience policy in `options`.
    ///
    /// The thunk must be re-invocable: it is called once per attempt. Known
    /// limitation, by design: without `options.coalesce`, concurrent calls
    /// for the same cache key while a miss is being resolved each execute
    /// the thunk independently.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        thunk: F,
        options: QueryOptions,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let key = options.effective_key(operation);

        // 1. Cache-first: a live entry short-circuits without invoking the
        //    thunk at all.
        if options.cache {
            if let Some(value) = self.cache.get(&key).await {
                match serde_json::from_value::<T>(value) {
                    Ok(result) => {
                        debug!(operation, key = %key, "cache hit");
                        self.record(operation, started, true, true, None);
                        return Ok(result);
                    }
                    Err(e) => {
                        // A shape mismatch means the entry is useless; treat
                        // as a miss and refetch.
                        warn!(operation, key = %key, error = %e, "cached value failed to decode");
                        self.cache.invalidate(&key).await;
                    }
                }
            }
        }

        if options.coalesce {
            match self.coalescer.join(&key) {
                Coalesce::Follower(mut receiver) => {
                    let outcome = match receiver.recv().await {
                        Ok(result) => result,
                        Err(_) => Err(QueryError::Failed {
                            operation: operation.to_string(),
                            message: "coalesced leader abandoned the operation".to_string(),
                        }),
                    };

                    // Followers did no backing-store work of their own;
                    // their result is effectively a cache-level hit.
                    let error = outcome.as_ref().err().map(|e| e.to_string());
                    self.record(operation, started, true, outcome.is_ok(), error);

                    let value = outcome?;
                    return serde_json::from_value(value).map_err(|e| QueryError::Codec {
                        operation: operation.to_string(),
                        message: e.to_string(),
                    });
                }
                Coalesce::Leader(guard) => {
                    let result = self
                        .run_and_settle(operation, &thunk, &options, &key, started)
                        .await;

                    let shared = match &result {
                        Ok(value) => match serde_json::to_value(value) {
                            Ok(json) => Ok(json),
                            Err(e) => Err(QueryError::Codec {
                                operation: operation.to_string(),
                                message: e.to_string(),
                            }),
                        },
                        Err(e) => Err(e.clone()),
                    };
                    guard.publish(shared);

                    return result;
                }
            }
        }

        self.run_and_settle(operation, &thunk, &options, &key, started)
            .await
    }

    /// Runs the attempt loop, then applies cache population, invalidation,
    /// and metric recording to the outcome.
    async fn run_and_settle<T, E, F, Fut>(
        &self,
        operation: &str,
        thunk: &F,
        options: &QueryOptions,
        key: &str,
        started: Instant,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.run_attempts(operation, thunk, options).await;

        match &result {
            Ok(value) => {
                if options.cache {
                    match serde_json::to_value(value) {
                        Ok(json) => self.cache.insert(key, json, options.cache_ttl).await,
                        Err(e) => {
                            warn!(operation, key = %key, error = %e, "result not cacheable");
                        }
                    }
                }

                // A write that succeeded makes these keys stale; dropping
                // them here is correctness, not tuning.
                for stale in &options.invalidate_keys {
                    self.cache.invalidate(stale).await;
                }

                self.record(operation, started, false, true, None);
            }
            Err(e) => {
                self.record(operation, started, false, false, Some(e.to_string()));
            }
        }

        result
    }

    /// One attempt plus up to `max_retries` retries, each raced against the
    /// per-attempt timeout, with exponential backoff between attempts.
    async fn run_attempts<T, E, F, Fut>(
        &self,
        operation: &str,
        thunk: &F,
        options: &QueryOptions,
    ) -> Result<T, QueryError>
    where
        E: fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let failure = match tokio::time::timeout(options.timeout, thunk()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => QueryError::Failed {
                    operation: operation.to_string(),
                    message: e.to_string(),
                },
                Err(_) => QueryError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: options.timeout.as_millis() as u64,
                },
            };

            if attempt >= options.max_retries {
                warn!(
                    operation,
                    attempts = attempt + 1,
                    priority = options.priority.as_str(),
                    error = %failure,
                    "operation failed after exhausting retries"
                );
                return Err(failure);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn record(
        &self,
        operation: &str,
        started: Instant,
        cached: bool,
        success: bool,
        error: Option<String>,
    ) {
        self.metrics.record(QueryMetric {
            operation_name: operation.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            cached,
            success,
            timestamp: Utc::now(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> QueryExecutor {
        QueryExecutor::new(Arc::new(MetricsAggregator::new()))
    }

    #[test]
    fn test_backoff_schedule_matches_formula() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_success_without_options() {
        let exec = executor();
        let result: Result<u32, _> = exec
            .execute(
                "get_answer",
                || async { Ok::<_, String>(42) },
                QueryOptions::default(),
            )
            .await;

        assert_eq!(result.unwrap(), 42);

        let snapshot = exec.metrics().snapshot();
        assert_eq!(snapshot.total_operations, 1);
        assert_eq!(snapshot.error_rate_percent, 0.0);
        assert_eq!(snapshot.cache_hit_rate_percent, 0.0);
    }

    #[tokio::test]
    async fn test_cache_short_circuits_second_call() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result: u32 = exec
                .execute(
                    "get_profile",
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, String>(7)
                        }
                    },
                    QueryOptions::cached("profile:7"),
                )
                .await
                .unwrap();
            assert_eq!(result, 7);
        }

        // The second call was served from cache; the thunk ran exactly once.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = exec.metrics().snapshot();
        assert_eq!(snapshot.total_operations, 2);
        assert_eq!(snapshot.cache_hit_rate_percent, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_documented_backoff() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let calls_clone = Arc::clone(&calls);
        let result: u32 = exec
            .execute(
                "flaky_read",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        // Fail exactly twice, then succeed.
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("transient".to_string())
                        } else {
                            Ok(99)
                        }
                    }
                },
                QueryOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Cumulative delay is exactly backoff(0) + backoff(1) = 1s + 2s.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_last_error() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result: Result<u32, _> = exec
            .execute(
                "doomed_read",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<u32, _>("backing store down".to_string())
                    }
                },
                QueryOptions::default(),
            )
            .await;

        // 1 initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(QueryError::Failed { ref message, .. }) if message == "backing store down"
        ));

        let snapshot = exec.metrics().snapshot();
        assert_eq!(snapshot.error_rate_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let exec = executor();

        let result: Result<u32, _> = exec
            .execute(
                "stuck_read",
                || async {
                    std::future::pending::<()>().await;
                    Ok::<u32, String>(0)
                },
                QueryOptions::default()
                    .with_timeout(Duration::from_millis(100))
                    .with_max_retries(0),
            )
            .await;

        assert!(matches!(
            result,
            Err(QueryError::Timeout { timeout_ms: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_successful_write_invalidates_keys() {
        let exec = executor();

        // Seed the cache via a cached read.
        let _: u32 = exec
            .execute(
                "get_profile",
                || async { Ok::<_, String>(1) },
                QueryOptions::cached("profile:1"),
            )
            .await
            .unwrap();

        // A write invalidates it.
        let _: bool = exec
            .execute(
                "update_profile",
                || async { Ok::<_, String>(true) },
                QueryOptions::write(["profile:1"]),
            )
            .await
            .unwrap();

        // Next cached read misses and re-runs the thunk.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let _: u32 = exec
            .execute(
                "get_profile",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(2)
                    }
                },
                QueryOptions::cached("profile:1"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_intact() {
        let exec = executor();

        let _: u32 = exec
            .execute(
                "get_profile",
                || async { Ok::<_, String>(5) },
                QueryOptions::cached("profile:5"),
            )
            .await
            .unwrap();

        let _: Result<bool, _> = exec
            .execute(
                "update_profile",
                || async { Err::<bool, _>("rejected".to_string()) },
                QueryOptions::write(["profile:5"]).with_max_retries(0),
            )
            .await;

        // The write failed, so the cached read is still valid.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let value: u32 = exec
            .execute(
                "get_profile",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(0)
                    }
                },
                QueryOptions::cached("profile:5"),
            )
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_coalesce_runs_thunk_once_for_concurrent_callers() {
        let exec = Arc::new(executor());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let exec = Arc::clone(&exec);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                exec.execute(
                    "get_feed",
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(11u32)
                        }
                    },
                    QueryOptions::cached("feed").coalesced(),
                )
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 11);
        }

        // All four callers observed the same single execution.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_coalescing_concurrent_misses_each_execute() {
        let exec = Arc::new(executor());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let exec = Arc::clone(&exec);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                exec.execute(
                    "get_feed",
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(1u32)
                        }
                    },
                    QueryOptions::cached("feed"),
                )
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Documented limitation: each concurrent miss ran independently.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_coalesced_leader_error_reaches_followers() {
        let exec = Arc::new(executor());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let exec = Arc::clone(&exec);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                exec.execute::<u32, _, _, _>(
                    "broken_feed",
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err::<u32, _>("nope".to_string())
                        }
                    },
                    QueryOptions::cached("broken").coalesced().with_max_retries(0),
                )
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
