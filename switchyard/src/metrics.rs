//! Prometheus metrics instrumentation for switchyard.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `switchyard_messages_dispatched_total` - Messages handed to endpoint executors
//! - `switchyard_submission_rejections_total` - Executor submissions rejected at the concurrency limit
//! - `switchyard_endpoint_failures_total` - Endpoint invocations that returned an error
//! - `switchyard_groups_expired_total` - Message groups removed by expiry scans
//!
//! ## Gauges
//! - `switchyard_endpoint_active` - In-flight invocations per endpoint
//!
//! ## Histograms
//! - `switchyard_endpoint_duration_seconds` - Endpoint invocation duration
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Registry holding every switchyard collector.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `endpoint`
pub static MESSAGES_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "switchyard_messages_dispatched_total",
        "Messages handed to endpoint executors",
    );
    CounterVec::new(opts, &["endpoint"])
        .expect("switchyard_messages_dispatched_total metric creation failed")
});

/// Labels: `endpoint`
pub static SUBMISSION_REJECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "switchyard_submission_rejections_total",
        "Endpoint task submissions rejected at the concurrency limit",
    );
    CounterVec::new(opts, &["endpoint"])
        .expect("switchyard_submission_rejections_total metric creation failed")
});

/// Labels: `endpoint`
pub static ENDPOINT_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "switchyard_endpoint_failures_total",
        "Endpoint invocations that returned an error",
    );
    CounterVec::new(opts, &["endpoint"])
        .expect("switchyard_endpoint_failures_total metric creation failed")
});

pub static GROUPS_EXPIRED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "switchyard_groups_expired_total",
        "Message groups removed by expiry scans",
    )
    .expect("switchyard_groups_expired_total metric creation failed")
});

/// Labels: `endpoint`
pub static ENDPOINT_ACTIVE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "switchyard_endpoint_active",
        "In-flight invocations per endpoint",
    );
    GaugeVec::new(opts, &["endpoint"]).expect("switchyard_endpoint_active metric creation failed")
});

/// Labels: `endpoint`, `status` (success, failure)
pub static ENDPOINT_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.0005, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "switchyard_endpoint_duration_seconds",
        "Endpoint invocation duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["endpoint", "status"])
        .expect("switchyard_endpoint_duration_seconds metric creation failed")
});

/// Register every collector with [`REGISTRY`].
///
/// Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(MESSAGES_DISPATCHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(SUBMISSION_REJECTIONS_TOTAL.clone()),
        Box::new(ENDPOINT_FAILURES_TOTAL.clone()),
        Box::new(GROUPS_EXPIRED_TOTAL.clone()),
        Box::new(ENDPOINT_ACTIVE.clone()),
        Box::new(ENDPOINT_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_message_dispatched(endpoint: &str) {
    MESSAGES_DISPATCHED_TOTAL.with_label_values(&[endpoint]).inc();
}

pub fn record_submission_rejected(endpoint: &str) {
    SUBMISSION_REJECTIONS_TOTAL.with_label_values(&[endpoint]).inc();
}

pub fn record_groups_expired(count: u64) {
    GROUPS_EXPIRED_TOTAL.inc_by(count);
}

pub fn set_endpoint_active(endpoint: &str, active: f64) {
    ENDPOINT_ACTIVE.with_label_values(&[endpoint]).set(active);
}

/// Observe an invocation duration; failures also bump the failure counter.
pub fn observe_invocation(endpoint: &str, status: &str, duration_secs: f64) {
    ENDPOINT_DURATION_SECONDS
        .with_label_values(&[endpoint, status])
        .observe(duration_secs);
    if status == "failure" {
        ENDPOINT_FAILURES_TOTAL.with_label_values(&[endpoint]).inc();
    }
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should be a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_message_dispatched("echo");
        record_submission_rejected("echo");
        observe_invocation("echo", "failure", 0.25);
        set_endpoint_active("echo", 1.0);
        record_groups_expired(2);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("switchyard_messages_dispatched_total"));
        assert!(output.contains("switchyard_submission_rejections_total"));
        assert!(output.contains("switchyard_endpoint_failures_total"));
        assert!(output.contains("switchyard_groups_expired_total"));
    }
}
