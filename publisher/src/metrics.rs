//! Prometheus metrics for the publisher

use crate::error::{PublishError, Result};
use parking_lot::Mutex;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, TextEncoder, register_counter_vec,
    register_gauge, register_histogram_vec, register_int_counter,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Serializes registration so concurrent `init` calls don't double-register
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Publisher metrics
pub struct Metrics {
    /// Samples accepted by `publish`
    pub samples_published: IntCounter,

    /// Batches delivered (by sender)
    pub batches_sent: CounterVec,

    /// Batches discarded (by reason)
    pub batches_dropped: CounterVec,

    /// Samples discarded (by reason)
    pub samples_dropped: CounterVec,

    /// Delivery failures handled by policy (by sender)
    pub delivery_failures: CounterVec,

    /// Batches waiting in the pending queue
    pub queue_length: Gauge,

    /// Send latency (by sender)
    pub send_latency: HistogramVec,
}

impl Metrics {
    /// Initialize metrics (safe to call more than once)
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let _guard = INIT_LOCK.lock();
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            samples_published: register_int_counter!(
                "meterpub_samples_published_total",
                "Total samples accepted for publishing"
            )
            .map_err(|e| PublishError::Metrics(format!("samples_published: {e}")))?,

            batches_sent: register_counter_vec!(
                "meterpub_batches_sent_total",
                "Total batches delivered",
                &["sender"]
            )
            .map_err(|e| PublishError::Metrics(format!("batches_sent: {e}")))?,

            batches_dropped: register_counter_vec!(
                "meterpub_batches_dropped_total",
                "Total batches discarded",
                &["reason"]
            )
            .map_err(|e| PublishError::Metrics(format!("batches_dropped: {e}")))?,

            samples_dropped: register_counter_vec!(
                "meterpub_samples_dropped_total",
                "Total samples discarded",
                &["reason"]
            )
            .map_err(|e| PublishError::Metrics(format!("samples_dropped: {e}")))?,

            delivery_failures: register_counter_vec!(
                "meterpub_delivery_failures_total",
                "Total delivery failures",
                &["sender"]
            )
            .map_err(|e| PublishError::Metrics(format!("delivery_failures: {e}")))?,

            queue_length: register_gauge!(
                "meterpub_queue_length",
                "Batches waiting in the pending queue"
            )
            .map_err(|e| PublishError::Metrics(format!("queue_length: {e}")))?,

            send_latency: register_histogram_vec!(
                "meterpub_send_latency_seconds",
                "Latency of a single batch send",
                &["sender"],
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .map_err(|e| PublishError::Metrics(format!("send_latency: {e}")))?,
        };

        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| PublishError::Metrics("failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance, if initialized
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
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

pub fn try_record_published(samples: usize) {
    if let Some(m) = Metrics::get() {
        m.samples_published.inc_by(samples as u64);
    }
}

pub fn try_record_sent(sender: &str, seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.batches_sent.with_label_values(&[sender]).inc();
        m.send_latency.with_label_values(&[sender]).observe(seconds);
    }
}

pub fn try_record_delivery_failure(sender: &str) {
    if let Some(m) = Metrics::get() {
        m.delivery_failures.with_label_values(&[sender]).inc();
    }
}

pub fn try_record_dropped(reason: &str, batches: usize, samples: usize) {
    if let Some(m) = Metrics::get() {
        m.batches_dropped
            .with_label_values(&[reason])
            .inc_by(batches as f64);
        m.samples_dropped
            .with_label_values(&[reason])
            .inc_by(samples as f64);
    }
}

pub fn try_set_queue_length(len: usize) {
    if let Some(m) = Metrics::get() {
        m.queue_length.set(len as f64);
    }
}
