//! Metrics collection and export module

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub attempts_total: IntCounter,
    pub registrations_total: IntCounter,
    pub abandonments_total: IntCounter,
    pub low_fee_rejections_total: IntCounter,
    pub other_rejections_total: IntCounter,
    pub submission_errors_total: IntCounter,
    pub source_failures_total: IntCounter,
    pub notification_failures_total: IntCounter,

    // Gauges
    pub block_height: IntGauge,
    pub window_open: IntGauge,
    pub responding_sources: IntGauge,
    pub active_executors: IntGauge,
    pub fee_multiplier: Gauge,

    // Histograms
    pub submit_latency: Histogram,
    pub source_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let attempts_total = IntCounter::with_opts(Opts::new(
            "registration_attempts_total",
            "Total number of registration submissions",
        ))?;

        let registrations_total = IntCounter::with_opts(Opts::new(
            "registrations_total",
            "Number of wallets registered",
        ))?;

        let abandonments_total = IntCounter::with_opts(Opts::new(
            "abandonments_total",
            "Number of wallets abandoned",
        ))?;

        let low_fee_rejections_total = IntCounter::with_opts(Opts::new(
            "low_fee_rejections_total",
            "Submissions rejected because the fee was too low",
        ))?;

        let other_rejections_total = IntCounter::with_opts(Opts::new(
            "other_rejections_total",
            "Submissions rejected for reasons other than the fee",
        ))?;

        let submission_errors_total = IntCounter::with_opts(Opts::new(
            "submission_errors_total",
            "Submissions that failed with a network or timeout error",
        ))?;

        let source_failures_total = IntCounter::with_opts(Opts::new(
            "source_failures_total",
            "Block source polls that produced no snapshot",
        ))?;

        let notification_failures_total = IntCounter::with_opts(Opts::new(
            "notification_failures_total",
            "Notifications that could not be delivered",
        ))?;

        let block_height =
            IntGauge::with_opts(Opts::new("block_height", "Last published block height"))?;

        let window_open = IntGauge::with_opts(Opts::new(
            "window_open",
            "1 while the registration window is open",
        ))?;

        let responding_sources = IntGauge::with_opts(Opts::new(
            "responding_sources",
            "Block sources that responded in the last tick",
        ))?;

        let active_executors = IntGauge::with_opts(Opts::new(
            "active_executors",
            "Attempt executors currently running",
        ))?;

        let fee_multiplier =
            Gauge::with_opts(Opts::new("fee_multiplier", "Current priority fee multiplier"))?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("submit_latency_seconds", "Registration submission latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        let source_latency = Histogram::with_opts(
            HistogramOpts::new("source_latency_seconds", "Block source poll latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(abandonments_total.clone()))?;
        registry.register(Box::new(low_fee_rejections_total.clone()))?;
        registry.register(Box::new(other_rejections_total.clone()))?;
        registry.register(Box::new(submission_errors_total.clone()))?;
        registry.register(Box::new(source_failures_total.clone()))?;
        registry.register(Box::new(notification_failures_total.clone()))?;
        registry.register(Box::new(block_height.clone()))?;
        registry.register(Box::new(window_open.clone()))?;
        registry.register(Box::new(responding_sources.clone()))?;
        registry.register(Box::new(active_executors.clone()))?;
        registry.register(Box::new(fee_multiplier.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;
        registry.register(Box::new(source_latency.clone()))?;

        Ok(Self {
            registry,
            attempts_total,
            registrations_total,
            abandonments_total,
            low_fee_rejections_total,
            other_rejections_total,
            submission_errors_total,
            source_failures_total,
            notification_failures_total,
            block_height,
            window_open,
            responding_sources,
            active_executors,
            fee_multiplier,
            submit_latency,
            source_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encode() {
        let m = Metrics::new().unwrap();
        m.attempts_total.inc();
        m.block_height.set(4_000_123);
        m.fee_multiplier.set(1.5);

        let text = m.encode().unwrap();
        assert!(text.contains("registration_attempts_total 1"));
        assert!(text.contains("block_height 4000123"));
        assert!(text.contains("fee_multiplier 1.5"));
    }

    #[test]
    fn test_timer_observes() {
        let m = Metrics::new().unwrap();
        let timer = Timer::start();
        timer.observe_duration(&m.submit_latency);
        assert_eq!(m.submit_latency.get_sample_count(), 1);
    }
}
