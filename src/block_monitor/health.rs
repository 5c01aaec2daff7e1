//! Per-source health tracking
//!
//! Health is reported, never used to skip a source: every configured source is
//! polled every tick and reconciliation decides what to trust.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive failures before a source is marked degraded
const DEGRADED_AFTER: u64 = 2;
/// Consecutive failures before a source is marked unhealthy
const UNHEALTHY_AFTER: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// EWMA latency tracker
#[derive(Debug)]
struct LatencyTracker {
    ewma_latency_ms: Mutex<f64>,
    alpha: f64, // 0.2 = 20% new, 80% old
}

impl LatencyTracker {
    fn new(alpha: f64) -> Self {
        Self {
            ewma_latency_ms: Mutex::new(0.0),
            alpha: alpha.clamp(0.01, 0.99),
        }
    }

    fn update(&self, latency_ms: f64) {
        let mut ewma = self.ewma_latency_ms.lock();
        if *ewma == 0.0 {
            *ewma = latency_ms;
        } else {
            *ewma = self.alpha * latency_ms + (1.0 - self.alpha) * *ewma;
        }
    }

    fn get(&self) -> f64 {
        *self.ewma_latency_ms.lock()
    }
}

/// Snapshot of one source's health
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub ewma_latency_ms: f64,
    pub consecutive_failures: u64,
    pub total_requests: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct SourceHealth {
    source: String,
    status: Mutex<HealthStatus>,
    consecutive_failures: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    latency: LatencyTracker,
    last_error: Mutex<Option<String>>,
}

impl SourceHealth {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: Mutex::new(HealthStatus::Healthy),
            consecutive_failures: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            latency: LatencyTracker::new(0.2),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.latency.update(latency.as_secs_f64() * 1000.0);
        self.refresh_status();
    }

    pub fn record_failure(&self, error: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
        self.refresh_status();
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.lock()
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.successful_requests.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            source: self.source.clone(),
            status: self.status(),
            success_rate: self.success_rate(),
            ewma_latency_ms: self.latency.get(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn refresh_status(&self) {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let next = if failures >= UNHEALTHY_AFTER {
            HealthStatus::Unhealthy
        } else if failures >= DEGRADED_AFTER {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let mut status = self.status.lock();
        if *status != next {
            match next {
                HealthStatus::Healthy => {
                    info!(source = %self.source, old = ?*status, "Block source recovered")
                }
                _ => warn!(
                    source = %self.source,
                    old = ?*status,
                    new = ?next,
                    consecutive_failures = failures,
                    "Block source health changed"
                ),
            }
            *status = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_consecutive_failures() {
        let health = SourceHealth::new("taostats");
        assert_eq!(health.status(), HealthStatus::Healthy);

        health.record_failure("timeout");
        assert_eq!(health.status(), HealthStatus::Healthy);
        health.record_failure("timeout");
        assert_eq!(health.status(), HealthStatus::Degraded);
        for _ in 0..3 {
            health.record_failure("timeout");
        }
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.record_success(Duration::from_millis(40));
        assert_eq!(health.status(), HealthStatus::Healthy);

        let stats = health.stats();
        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.last_error.as_deref(), Some("timeout"));
        assert!((stats.success_rate - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_latency() {
        let health = SourceHealth::new("node");
        health.record_success(Duration::from_millis(100));
        assert!((health.stats().ewma_latency_ms - 100.0).abs() < 1e-6);

        health.record_success(Duration::from_millis(200));
        // 0.2 * 200 + 0.8 * 100
        assert!((health.stats().ewma_latency_ms - 120.0).abs() < 1e-6);
    }
}
