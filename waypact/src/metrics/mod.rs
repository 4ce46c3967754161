//! Query metrics for observability and tuning.
//!
//! Every call through the query executor records one [`QueryMetric`]. The
//! aggregator keeps a rolling window of the most recent records and derives
//! hit rates, error rates, and slow-operation reports from it. Metrics are
//! observability only; nothing here ever gates correctness.
//!
//! # Architecture
//!
//! ```text
//! QueryExecutor ─────► MetricsAggregator ─────► MetricsSnapshot ─────► Views
//!                      (rolling window)        (point-in-time copy)
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Maximum metric records retained. An unbounded log is a leak.
pub const MAX_METRICS: usize = 1000;

/// Default duration above which an operation counts as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

/// Error rate (percent) above which health degrades.
const DEGRADED_ERROR_RATE_PERCENT: f64 = 20.0;

/// Outcome of one executed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetric {
    /// Logical name of the operation.
    pub operation_name: String,
    /// Wall-clock duration of the call, including retries.
    pub duration_ms: u64,
    /// Whether the result came from cache without invoking the operation.
    pub cached: bool,
    /// Whether the call ultimately succeeded.
    pub success: bool,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
    /// Error message after retry exhaustion, if the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time aggregate over the rolling window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Records currently in the window.
    pub total_operations: usize,
    /// Mean duration across the window.
    pub average_duration_ms: f64,
    /// Share of calls served from cache, in percent.
    pub cache_hit_rate_percent: f64,
    /// Share of failed calls, in percent.
    pub error_rate_percent: f64,
    /// Calls slower than the configured threshold.
    pub slow_operation_count: usize,
}

/// Coarse health classification derived from the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    /// Error rate and latency are within expected bounds.
    Healthy,
    /// The window shows sustained failures or slowness.
    Degraded,
}

/// Tuning hints derived from the window; advisory only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningReport {
    pub health: HealthStatus,
    pub recommendations: Vec<String>,
}

/// Rolling window of per-operation outcomes.
pub struct MetricsAggregator {
    records: Mutex<VecDeque<QueryMetric>>,
    capacity: usize,
    slow_threshold: Duration,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Creates an aggregator with the default window and slow threshold.
    pub fn new() -> Self {
        Self::with_config(MAX_METRICS, DEFAULT_SLOW_THRESHOLD)
    }

    /// Creates an aggregator with an explicit window size and slow
    /// threshold (useful for testing).
    pub fn with_config(capacity: usize, slow_threshold: Duration) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            slow_threshold,
        }
    }

    /// Appends a record, evicting the oldest when the window is full.
    pub fn record(&self, metric: QueryMetric) {
        let mut records = self.records.lock();
        records.push_back(metric);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Number of records currently in the window.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when no calls have been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Aggregates the current window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let records = self.records.lock();
        let total = records.len();

        if total == 0 {
            return MetricsSnapshot {
                total_operations: 0,
                average_duration_ms: 0.0,
                cache_hit_rate_percent: 0.0,
                error_rate_percent: 0.0,
                slow_operation_count: 0,
            };
        }

        let slow_ms = self.slow_threshold.as_millis() as u64;
        let mut duration_sum = 0u64;
        let mut hits = 0usize;
        let mut errors = 0usize;
        let mut slow = 0usize;

        for record in records.iter() {
            duration_sum += record.duration_ms;
            if record.cached {
                hits += 1;
            }
            if !record.success {
                errors += 1;
            }
            if record.duration_ms > slow_ms {
                slow += 1;
            }
        }

        MetricsSnapshot {
            total_operations: total,
            average_duration_ms: duration_sum as f64 / total as f64,
            cache_hit_rate_percent: hits as f64 / total as f64 * 100.0,
            error_rate_percent: errors as f64 / total as f64 * 100.0,
            slow_operation_count: slow,
        }
    }

    /// The most recent operations slower than the configured threshold,
    /// newest first, capped at `limit`.
    pub fn slow_operations(&self, limit: usize) -> Vec<QueryMetric> {
        let slow_ms = self.slow_threshold.as_millis() as u64;
        self.records
            .lock()
            .iter()
            .rev()
            .filter(|m| m.duration_ms > slow_ms)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Derives a health classification and tuning hints from the window.
    pub fn assess(&self) -> TuningReport {
        let snapshot = self.snapshot();
        let mut recommendations = Vec::new();

        if snapshot.error_rate_percent > DEGRADED_ERROR_RATE_PERCENT {
            recommendations.push(format!(
                "error rate {:.1}% exceeds {:.0}%; raise max_retries or investigate the backing store",
                snapshot.error_rate_percent, DEGRADED_ERROR_RATE_PERCENT
            ));
        }

        let slow_ms = self.slow_threshold.as_millis() as f64;
        if snapshot.total_operations > 0 && snapshot.average_duration_ms > slow_ms {
            recommendations.push(format!(
                "average duration {:.0}ms exceeds the {:.0}ms slow threshold; consider enabling caching for hot reads",
                snapshot.average_duration_ms, slow_ms
            ));
        }

        let health = if recommendations.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        TuningReport {
            health,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str, duration_ms: u64, cached: bool, success: bool) -> QueryMetric {
        QueryMetric {
            operation_name: name.to_string(),
            duration_ms,
            cached,
            success,
            timestamp: Utc::now(),
            error: if success { None } else { Some("boom".into()) },
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let aggregator = MetricsAggregator::new();
        let snapshot = aggregator.snapshot();

        assert_eq!(snapshot.total_operations, 0);
        assert_eq!(snapshot.average_duration_ms, 0.0);
        assert_eq!(snapshot.cache_hit_rate_percent, 0.0);
        assert_eq!(snapshot.error_rate_percent, 0.0);
    }

    #[test]
    fn test_snapshot_aggregates() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(metric("get_profile", 100, true, true));
        aggregator.record(metric("get_profile", 300, false, true));
        aggregator.record(metric("place_bet", 200, false, false));
        aggregator.record(metric("get_odds", 400, false, true));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_operations, 4);
        assert_eq!(snapshot.average_duration_ms, 250.0);
        assert_eq!(snapshot.cache_hit_rate_percent, 25.0);
        assert_eq!(snapshot.error_rate_percent, 25.0);
    }

    #[test]
    fn test_window_evicts_oldest_first() {
        let aggregator = MetricsAggregator::with_config(3, DEFAULT_SLOW_THRESHOLD);

        for i in 0..5 {
            aggregator.record(metric(&format!("op-{}", i), 10, false, true));
        }

        assert_eq!(aggregator.len(), 3);

        // Only the newest three remain.
        let slow = aggregator.slow_operations(10);
        assert!(slow.is_empty());
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_operations, 3);
    }

    #[test]
    fn test_default_window_cap() {
        let aggregator = MetricsAggregator::new();
        for i in 0..(MAX_METRICS + 50) {
            aggregator.record(metric(&format!("op-{}", i), 1, false, true));
        }
        assert_eq!(aggregator.len(), MAX_METRICS);
    }

    #[test]
    fn test_slow_operations_newest_first() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(metric("fast", 50, false, true));
        aggregator.record(metric("slow-1", 1500, false, true));
        aggregator.record(metric("slow-2", 2500, false, true));

        let slow = aggregator.slow_operations(10);
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].operation_name, "slow-2");
        assert_eq!(slow[1].operation_name, "slow-1");
    }

    #[test]
    fn test_slow_threshold_is_exclusive() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(metric("edge", 1000, false, true));

        assert!(aggregator.slow_operations(10).is_empty());
        assert_eq!(aggregator.snapshot().slow_operation_count, 0);
    }

    #[test]
    fn test_assess_healthy() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(metric("get_profile", 100, true, true));
        aggregator.record(metric("get_profile", 120, true, true));

        let report = aggregator.assess();
        assert_eq!(report.health, HealthStatus::Healthy);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_assess_degraded_on_errors() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(metric("place_bet", 100, false, false));
        aggregator.record(metric("place_bet", 100, false, false));
        aggregator.record(metric("get_odds", 100, false, true));

        let report = aggregator.assess();
        assert_eq!(report.health, HealthStatus::Degraded);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_assess_degraded_on_latency() {
        let aggregator = MetricsAggregator::with_config(100, Duration::from_millis(200));
        aggregator.record(metric("get_feed", 900, false, true));
        aggregator.record(metric("get_feed", 800, false, true));

        let report = aggregator.assess();
        assert_eq!(report.health, HealthStatus::Degraded);
    }
}
