//! Tracing and telemetry instrumentation for switchyard.
//!
//! Span constructors for dispatcher cycles, endpoint invocations and group
//! expiry scans, plus `record_*` helpers that log through `tracing` and, with
//! the `metrics` feature, update the Prometheus collectors in
//! [`crate::metrics`]. Without the feature the helpers only log.
//!
//! # Example
//!
//! ```ignore
//! use switchyard::telemetry::{dispatch_cycle_span, record_message_dispatched};
//!
//! let span = dispatch_cycle_span("orders", "order-handler");
//! let _enter = span.enter();
//! record_message_dispatched("order-handler");
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{info_span, Instrument, Span};

/// Create a tracing span covering one dispatcher cycle.
#[must_use]
pub fn dispatch_cycle_span(channel: impl AsRef<str>, endpoint: impl AsRef<str>) -> Span {
    info_span!(
        "switchyard.dispatch",
        channel = %channel.as_ref(),
        endpoint = %endpoint.as_ref(),
    )
}

/// Create a tracing span covering one endpoint invocation.
#[must_use]
pub fn endpoint_invoke_span(endpoint: impl AsRef<str>, message_id: impl AsRef<str>) -> Span {
    info_span!(
        "switchyard.invoke",
        endpoint = %endpoint.as_ref(),
        message_id = %message_id.as_ref(),
    )
}

/// Create a tracing span covering one message group expiry scan.
#[must_use]
pub fn group_expiry_span(timeout_millis: i64) -> Span {
    info_span!("switchyard.expire", timeout_millis = timeout_millis)
}

/// Attach an endpoint invocation span to a future.
pub fn instrument_invoke<F>(
    endpoint: impl AsRef<str>,
    message_id: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(endpoint_invoke_span(endpoint, message_id))
}

/// Record a message handed to an endpoint executor.
pub fn record_message_dispatched(endpoint: impl AsRef<str>) {
    tracing::trace!(endpoint = %endpoint.as_ref(), "message dispatched");

    #[cfg(feature = "metrics")]
    crate::metrics::record_message_dispatched(endpoint.as_ref());
}

/// Record one rejected submission to an endpoint executor.
pub fn record_submission_rejected(endpoint: impl AsRef<str>) {
    tracing::trace!(endpoint = %endpoint.as_ref(), "endpoint task submission rejected");

    #[cfg(feature = "metrics")]
    crate::metrics::record_submission_rejected(endpoint.as_ref());
}

/// Record the outcome and duration of an endpoint invocation.
///
/// `status` is `"success"` or `"failure"`.
pub fn record_invocation_finished(endpoint: impl AsRef<str>, status: &str, duration: Duration) {
    tracing::debug!(
        endpoint = %endpoint.as_ref(),
        status = status,
        duration_secs = duration.as_secs_f64(),
        "endpoint invocation finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_invocation(endpoint.as_ref(), status, duration.as_secs_f64());
}

/// Update the in-flight invocation gauge for an endpoint.
pub fn set_endpoint_active(endpoint: impl AsRef<str>, active: usize) {
    #[cfg(feature = "metrics")]
    crate::metrics::set_endpoint_active(endpoint.as_ref(), active as f64);

    #[cfg(not(feature = "metrics"))]
    let _ = (endpoint, active);
}

/// Record message groups removed by an expiry scan.
pub fn record_groups_expired(count: usize) {
    if count > 0 {
        tracing::info!(count = count, "expired message groups");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_groups_expired(count as u64);
}

/// Start timing an endpoint invocation.
pub fn record_invocation_start(endpoint: impl AsRef<str>) -> InvocationTimer {
    InvocationTimer {
        endpoint: endpoint.as_ref().to_string(),
        start: Instant::now(),
    }
}

/// Timing handle returned by [`record_invocation_start`].
#[derive(Debug)]
pub struct InvocationTimer {
    endpoint: String,
    start: Instant,
}

impl InvocationTimer {
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and record the invocation outcome.
    pub fn finish(self, status: &str) {
        let elapsed = self.start.elapsed();
        record_invocation_finished(&self.endpoint, status, elapsed);
    }
}
