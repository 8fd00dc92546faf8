//! Spout metrics
//!
//! Two layers:
//!
//! - [`SpoutCounters`] / [`MetricsSnapshot`]: per-spout rolling counters.
//!   Taking a snapshot resets the interval counters (received, emitted,
//!   bytes) but not the outstanding state (pending acks, pending retries).
//! - [`Metrics`]: the process-wide Prometheus registry the host publishes
//!   snapshots into, labelled by spout id.

use crate::error::{Result, SpoutError};
use prometheus::{
    CounterVec, Encoder, GaugeVec, TextEncoder, register_counter_vec, register_gauge_vec,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const NO_OF_PENDING_FAILED_MESSAGES: &str = "numberOfPendingFailedMessages";
pub const NO_OF_MESSAGES_RECEIVED: &str = "numberOfMessagesReceived";
pub const NO_OF_MESSAGES_EMITTED: &str = "numberOfMessagesEmitted";
pub const NO_OF_PENDING_ACKS: &str = "numberOfPendingAcks";
pub const CONSUMER_RATE: &str = "consumerRate";
pub const CONSUMER_THROUGHPUT_BYTES: &str = "consumerThroughput";

/// Interval counters maintained by the pull loop
#[derive(Debug, Default)]
pub struct SpoutCounters {
    received: AtomicU64,
    received_bytes: AtomicU64,
    emitted: AtomicU64,
}

impl SpoutCounters {
    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.received_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and zero the interval counters
    ///
    /// Returns `(received, received_bytes, emitted)`. Each counter is
    /// swapped atomically, so increments racing with the reset land in the
    /// next interval instead of being lost.
    pub fn take(&self) -> (u64, u64, u64) {
        (
            self.received.swap(0, Ordering::Relaxed),
            self.received_bytes.swap(0, Ordering::Relaxed),
            self.emitted.swap(0, Ordering::Relaxed),
        )
    }
}

/// Point-in-time view of a spout
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages currently tracked in the retry ledger
    #[serde(rename = "numberOfPendingFailedMessages")]
    pub pending_retry_count: u64,
    /// Messages received during the interval
    #[serde(rename = "numberOfMessagesReceived")]
    pub received_count: u64,
    /// Records emitted during the interval
    #[serde(rename = "numberOfMessagesEmitted")]
    pub emitted_count: u64,
    /// Emitted records awaiting ack or fail
    #[serde(rename = "numberOfPendingAcks")]
    pub pending_ack_count: u64,
    /// Messages received per second over the interval
    #[serde(rename = "consumerRate")]
    pub receive_rate: f64,
    /// Bytes received per second over the interval
    #[serde(rename = "consumerThroughput")]
    pub throughput_bytes: f64,
}

impl MetricsSnapshot {
    /// Build a snapshot, turning interval totals into per-second rates
    pub fn new(
        pending_retry_count: u64,
        pending_ack_count: u64,
        (received, received_bytes, emitted): (u64, u64, u64),
        interval: Duration,
    ) -> Self {
        let secs = interval.as_secs_f64();
        let per_sec = |total: u64| if secs > 0.0 { total as f64 / secs } else { 0.0 };
        Self {
            pending_retry_count,
            received_count: received,
            emitted_count: emitted,
            pending_ack_count,
            receive_rate: per_sec(received),
            throughput_bytes: per_sec(received_bytes),
        }
    }

    /// Snapshot as a JSON object keyed by the classic metric names
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Snapshot keyed by the classic metric names
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            (NO_OF_PENDING_FAILED_MESSAGES, self.pending_retry_count as f64),
            (NO_OF_MESSAGES_RECEIVED, self.received_count as f64),
            (NO_OF_MESSAGES_EMITTED, self.emitted_count as f64),
            (NO_OF_PENDING_ACKS, self.pending_ack_count as f64),
            (CONSUMER_RATE, self.receive_rate),
            (CONSUMER_THROUGHPUT_BYTES, self.throughput_bytes),
        ])
    }
}

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus metrics for all spouts in the process
pub struct Metrics {
    /// Messages in the retry ledger (by spout)
    pub pending_failed: GaugeVec,

    /// Messages received in the last interval (by spout)
    pub received: GaugeVec,

    /// Records emitted in the last interval (by spout)
    pub emitted: GaugeVec,

    /// Emitted records awaiting completion (by spout)
    pub pending_acks: GaugeVec,

    /// Receive rate, messages/s (by spout)
    pub consumer_rate: GaugeVec,

    /// Receive throughput, bytes/s (by spout)
    pub consumer_throughput: GaugeVec,

    /// Messages redelivered after backoff (by spout)
    pub redelivered: CounterVec,

    /// Messages dropped (by spout, reason)
    pub dropped: CounterVec,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let gauge = |name: &str, help: &str| {
            register_gauge_vec!(name, help, &["spout"])
                .map_err(|e| SpoutError::Metrics(format!("{name}: {e}")))
        };

        let metrics = Metrics {
            pending_failed: gauge(
                "spout_pending_failed_messages",
                "Failed messages awaiting redelivery or drop",
            )?,
            received: gauge(
                "spout_messages_received",
                "Messages received during the last interval",
            )?,
            emitted: gauge(
                "spout_messages_emitted",
                "Records emitted during the last interval",
            )?,
            pending_acks: gauge("spout_pending_acks", "Emitted records awaiting ack or fail")?,
            consumer_rate: gauge(
                "spout_consumer_rate",
                "Messages received per second over the last interval",
            )?,
            consumer_throughput: gauge(
                "spout_consumer_throughput_bytes",
                "Bytes received per second over the last interval",
            )?,
            redelivered: register_counter_vec!(
                "spout_messages_redelivered_total",
                "Failed messages re-emitted after backoff",
                &["spout"]
            )
            .map_err(|e| SpoutError::Metrics(format!("redelivered: {e}")))?,
            dropped: register_counter_vec!(
                "spout_messages_dropped_total",
                "Messages acknowledged without successful processing",
                &["spout", "reason"]
            )
            .map_err(|e| SpoutError::Metrics(format!("dropped: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| SpoutError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Publish a spout snapshot into the gauges
    pub fn publish(&self, spout: &str, snapshot: &MetricsSnapshot) {
        let labels = &[spout];
        self.pending_failed
            .with_label_values(labels)
            .set(snapshot.pending_retry_count as f64);
        self.received
            .with_label_values(labels)
            .set(snapshot.received_count as f64);
        self.emitted
            .with_label_values(labels)
            .set(snapshot.emitted_count as f64);
        self.pending_acks
            .with_label_values(labels)
            .set(snapshot.pending_ack_count as f64);
        self.consumer_rate
            .with_label_values(labels)
            .set(snapshot.receive_rate);
        self.consumer_throughput
            .with_label_values(labels)
            .set(snapshot.throughput_bytes);
    }

    pub fn record_redelivered(&self, spout: &str) {
        self.redelivered.with_label_values(&[spout]).inc();
    }

    pub fn record_dropped(&self, spout: &str, reason: &str) {
        self.dropped.with_label_values(&[spout, reason]).inc();
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Record a redelivery if metrics are initialized
pub fn try_record_redelivered(spout: &str) {
    if let Some(m) = Metrics::get() {
        m.record_redelivered(spout);
    }
}

/// Record a drop if metrics are initialized
pub fn try_record_dropped(spout: &str, reason: &str) {
    if let Some(m) = Metrics::get() {
        m.record_dropped(spout, reason);
    }
}
