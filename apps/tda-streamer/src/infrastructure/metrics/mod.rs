//! Prometheus Metrics Module
//!
//! Instrumentation for the streaming session.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, malformed records dropped
//! - **Delivery**: Records dispatched and consumer failures by domain
//! - **Control**: Control requests by command and outcome, round-trip latency
//! - **Session**: Current state, active subscriptions, reconnect attempts
//!
//! # Integration
//!
//! When a listen address is given the exporter serves `/metrics` over HTTP;
//! otherwise the recorder is installed without a listener and rendered via
//! [`get_metrics_handle`].

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::fields::Domain;
use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Subsequent calls return the existing
/// handle.
///
/// With `listen` set, the HTTP exporter is spawned on the current tokio
/// runtime.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder or listener cannot be set up.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).map_err(BuildError::FailedToSetGlobalRecorder)?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Metrics exporter stopped");
                }
            });
            handle
        }
        None => PrometheusBuilder::new().install_recorder()?,
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tda_streamer_frames_received_total",
        "Inbound frames by kind"
    );
    describe_counter!(
        "tda_streamer_malformed_records_total",
        "Records dropped because a field could not be decoded"
    );
    describe_counter!(
        "tda_streamer_records_dispatched_total",
        "Records delivered to consumers"
    );
    describe_counter!(
        "tda_streamer_consumer_failures_total",
        "Consumer invocations that returned an error or panicked"
    );
    describe_counter!(
        "tda_streamer_control_requests_total",
        "Control requests by command and outcome"
    );
    describe_histogram!(
        "tda_streamer_control_roundtrip_seconds",
        "Time from sending a control request to its response"
    );
    describe_counter!(
        "tda_streamer_reconnects_total",
        "Reconnection attempts by outcome"
    );
    describe_gauge!(
        "tda_streamer_session_state",
        "Current session state (0=disconnected .. 5=closed)"
    );
    describe_gauge!(
        "tda_streamer_subscriptions",
        "Domains with a live subscription"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Response with code zero.
    Accepted,
    /// Response with a non-zero code.
    Rejected,
    /// No response in time.
    TimedOut,
    /// Connection failed or session closed while waiting.
    Aborted,
}

impl ControlOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        }
    }
}

/// Outcome label for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Session re-established.
    Succeeded,
    /// Attempt failed, another will follow.
    Failed,
    /// Reconnection abandoned.
    GaveUp,
}

impl ReconnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::GaveUp => "gave_up",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame(kind: &'static str) {
    counter!("tda_streamer_frames_received_total", "kind" => kind).increment(1);
}

/// Record a record dropped by the codec.
pub fn record_malformed_record(domain: Domain) {
    counter!("tda_streamer_malformed_records_total", "domain" => domain.service()).increment(1);
}

/// Record records handed to consumers.
pub fn record_dispatched(domain: Domain, count: u64) {
    counter!("tda_streamer_records_dispatched_total", "domain" => domain.service())
        .increment(count);
}

/// Record a failed consumer invocation.
pub fn record_consumer_failure(domain: Domain) {
    counter!("tda_streamer_consumer_failures_total", "domain" => domain.service()).increment(1);
}

/// Record a completed control request.
pub fn record_control(command: &'static str, outcome: ControlOutcome, elapsed: Duration) {
    counter!(
        "tda_streamer_control_requests_total",
        "command" => command,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("tda_streamer_control_roundtrip_seconds", "command" => command)
        .record(elapsed.as_secs_f64());
}

/// Record a reconnect attempt.
pub fn record_reconnect(outcome: ReconnectOutcome) {
    counter!("tda_streamer_reconnects_total", "outcome" => outcome.as_str()).increment(1);
}

/// Publish the session state.
pub fn set_session_state(state: SessionState) {
    gauge!("tda_streamer_session_state").set(state.as_gauge());
}

/// Publish the number of live subscriptions.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("tda_streamer_subscriptions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(ControlOutcome::Accepted.as_str(), "accepted");
        assert_eq!(ControlOutcome::Rejected.as_str(), "rejected");
        assert_eq!(ControlOutcome::TimedOut.as_str(), "timed_out");
        assert_eq!(ControlOutcome::Aborted.as_str(), "aborted");
        assert_eq!(ReconnectOutcome::GaveUp.as_str(), "gave_up");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame("data");
        record_dispatched(Domain::Quote, 3);
        set_session_state(SessionState::Active);
        set_subscriptions(2);
    }
}
