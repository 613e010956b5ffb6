//! Prometheus metrics for the relay.
//!
//! # Metrics Exposed
//!
//! - `relay_messages_published_total` - Messages published, by lane
//! - `relay_messages_processed_total` - Worker outcomes, by lane and outcome
//! - `relay_upstream_retries_total` - Upstream retries performed by the worker
//! - `relay_reply_timeouts_total` - Callers that gave up waiting for a reply
//! - `relay_fallbacks_total` - Calls served directly over HTTP, by reason
//! - `relay_round_trip_seconds` - Caller-observed latency, by lane
//!
//! ```rust,ignore
//! use gx_graphql_gateway::RelayMetrics;
//!
//! let metrics = RelayMetrics::global();
//! metrics.record_published("proasig_high_priority");
//! println!("{}", metrics.render());
//! ```

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Instant;
use tracing::warn;

/// Latency buckets in seconds; the top bucket covers the reply timeout
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static METRICS: Lazy<RelayMetrics> = Lazy::new(RelayMetrics::new);

/// Worker outcome label values
pub mod outcome {
    pub const COMPLETED: &str = "completed";
    pub const DEAD_LETTERED: &str = "dead_lettered";
    pub const MALFORMED: &str = "malformed";
}

/// Relay counters and histograms
#[derive(Clone)]
pub struct RelayMetrics {
    pub published: IntCounterVec,
    pub processed: IntCounterVec,
    pub retries: IntCounterVec,
    pub timeouts: IntCounter,
    pub fallbacks: IntCounterVec,
    pub round_trip: HistogramVec,
}

impl RelayMetrics {
    fn new() -> Self {
        Self {
            published: register_int_counter_vec!(
                "relay_messages_published_total",
                "Messages published to a priority lane",
                &["queue"]
            )
            .expect("metric can be created"),

            processed: register_int_counter_vec!(
                "relay_messages_processed_total",
                "Messages settled by the worker loop",
                &["queue", "outcome"]
            )
            .expect("metric can be created"),

            retries: register_int_counter_vec!(
                "relay_upstream_retries_total",
                "Upstream calls retried by the worker loop",
                &["queue"]
            )
            .expect("metric can be created"),

            timeouts: register_int_counter!(
                "relay_reply_timeouts_total",
                "Callers that timed out waiting for a reply"
            )
            .expect("metric can be created"),

            fallbacks: register_int_counter_vec!(
                "relay_fallbacks_total",
                "Calls sent directly to the upstream instead of the broker",
                &["reason"]
            )
            .expect("metric can be created"),

            round_trip: register_histogram_vec!(
                "relay_round_trip_seconds",
                "Time from publish to reply as seen by the caller",
                &["queue"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("metric can be created"),
        }
    }

    /// Process-wide metrics instance
    pub fn global() -> &'static Self {
        &METRICS
    }

    pub fn record_published(&self, queue: &str) {
        self.published.with_label_values(&[queue]).inc();
    }

    pub fn record_processed(&self, queue: &str, outcome: &str) {
        self.processed.with_label_values(&[queue, outcome]).inc();
    }

    pub fn record_retry(&self, queue: &str) {
        self.retries.with_label_values(&[queue]).inc();
    }

    pub fn record_timeout(&self) {
        self.timeouts.inc();
    }

    pub fn record_fallback(&self, reason: &str) {
        self.fallbacks.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Records the round trip of one relayed call when dropped
pub struct RoundTripTimer {
    start: Instant,
    queue: &'static str,
}

impl RoundTripTimer {
    pub fn start(queue: &'static str) -> Self {
        Self {
            start: Instant::now(),
            queue,
        }
    }
}

impl Drop for RoundTripTimer {
    fn drop(&mut self) {
        RelayMetrics::global()
            .round_trip
            .with_label_values(&[self.queue])
            .observe(self.start.elapsed().as_secs_f64());
    }
}
