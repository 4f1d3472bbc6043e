//! Metrics collection for allocation monitoring
//!
//! Lock-free counters updated from the dispatch paths.
//! Snapshots taken for the status API and the shutdown summary.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Allocation metrics collector
///
/// Counters are independent; no cross-field consistency is implied.
pub struct MetricsCollector {
    /// Requests answered with a result
    served: AtomicU64,
    /// Payloads dropped without a reply
    unserved: AtomicU64,
    /// Results that granted resources
    granted: AtomicU64,
    /// Results that were the all-zero denial
    denied: AtomicU64,
    /// Messages whose handling failed
    failed: AtomicU64,
    confirmations_accepted: AtomicU64,
    confirmations_rejected: AtomicU64,
    /// Rejections whose release failed the pool's consistency check
    release_inconsistencies: AtomicU64,
    /// Response time statistics (nanoseconds)
    response_min_ns: AtomicU64,
    response_max_ns: AtomicU64,
    response_sum_ns: AtomicU64,
    response_count: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub served: u64,
    pub unserved: u64,
    pub granted: u64,
    pub denied: u64,
    pub failed: u64,
    pub confirmations_accepted: u64,
    pub confirmations_rejected: u64,
    pub release_inconsistencies: u64,
    pub response_min_ms: f64,
    pub response_max_ms: f64,
    pub response_avg_ms: f64,
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            served: AtomicU64::new(0),
            unserved: AtomicU64::new(0),
            granted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            confirmations_accepted: AtomicU64::new(0),
            confirmations_rejected: AtomicU64::new(0),
            release_inconsistencies: AtomicU64::new(0),
            response_min_ns: AtomicU64::new(u64::MAX),
            response_max_ns: AtomicU64::new(0),
            response_sum_ns: AtomicU64::new(0),
            response_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request answered after `elapsed`
    #[inline]
    pub fn record_served(&self, elapsed: Duration) {
        self.served.fetch_add(1, Ordering::Relaxed);
        self.record_response_time(elapsed);
    }

    #[inline]
    pub fn record_unserved(&self) {
        self.unserved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome kind of a result
    #[inline]
    pub fn record_outcome(&self, denied: bool) {
        if denied {
            self.denied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_confirmation(&self, accepted: bool) {
        if accepted {
            self.confirmations_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.confirmations_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_release_inconsistency(&self) {
        self.release_inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    fn record_response_time(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.response_min_ns.fetch_min(ns, Ordering::Relaxed);
        self.response_max_ns.fetch_max(ns, Ordering::Relaxed);
        self.response_sum_ns.fetch_add(ns, Ordering::Relaxed);
        self.response_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.response_count.load(Ordering::Relaxed);
        let (min_ms, max_ms, avg_ms) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let sum = self.response_sum_ns.load(Ordering::Relaxed);
            (
                ns_to_ms(self.response_min_ns.load(Ordering::Relaxed)),
                ns_to_ms(self.response_max_ns.load(Ordering::Relaxed)),
                ns_to_ms(sum) / count as f64,
            )
        };

        MetricsSnapshot {
            served: self.served.load(Ordering::Relaxed),
            unserved: self.unserved.load(Ordering::Relaxed),
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            confirmations_accepted: self.confirmations_accepted.load(Ordering::Relaxed),
            confirmations_rejected: self.confirmations_rejected.load(Ordering::Relaxed),
            release_inconsistencies: self.release_inconsistencies.load(Ordering::Relaxed),
            response_min_ms: min_ms,
            response_max_ms: max_ms,
            response_avg_ms: avg_ms,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Requests served: {}", self.served)?;
        writeln!(f, "Requests unserved: {}", self.unserved)?;
        writeln!(f, "Granted: {}, denied: {}, failed: {}", self.granted, self.denied, self.failed)?;
        writeln!(
            f,
            "Confirmations accepted: {}, rejected: {}, release inconsistencies: {}",
            self.confirmations_accepted, self.confirmations_rejected, self.release_inconsistencies
        )?;
        writeln!(
            f,
            "Response time ms (min/avg/max): {:.3}/{:.3}/{:.3}",
            self.response_min_ms, self.response_avg_ms, self.response_max_ms
        )?;
        write!(f, "Uptime: {}s", self.uptime_seconds)
    }
}
