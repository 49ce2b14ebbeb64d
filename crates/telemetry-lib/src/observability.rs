//! Observability infrastructure for the telemetry service
//!
//! Provides:
//! - Prometheus metrics (cycle latency, collection, detection and publish counters)
//! - Structured logging of pipeline events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::models::{Decision, IncidentSignal, Severity};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TelemetryMetricsInner> = OnceLock::new();

struct TelemetryMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles: IntCounter,
    empty_cycles: IntCounter,
    metrics_collected: IntCounter,
    collection_errors: IntCounterVec,
    signals_detected: IntCounterVec,
    events_published: IntCounter,
    publish_errors: IntCounterVec,
    scheduler_running: IntGauge,
}

impl TelemetryMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "telemetry_cycle_duration_seconds",
                "Time spent running one collect/detect/publish cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles: register_int_counter!(
                "telemetry_cycles_total",
                "Total number of pipeline cycles run"
            )
            .expect("Failed to register cycles_total"),

            empty_cycles: register_int_counter!(
                "telemetry_empty_cycles_total",
                "Cycles that ended early because no metrics were collected"
            )
            .expect("Failed to register empty_cycles_total"),

            metrics_collected: register_int_counter!(
                "telemetry_metrics_collected_total",
                "Total number of metric samples collected"
            )
            .expect("Failed to register metrics_collected_total"),

            collection_errors: register_int_counter_vec!(
                "telemetry_collection_errors_total",
                "Total number of failed metric source collections",
                &["source"]
            )
            .expect("Failed to register collection_errors_total"),

            signals_detected: register_int_counter_vec!(
                "telemetry_signals_detected_total",
                "Total number of incident signals raised by detectors",
                &["type", "severity"]
            )
            .expect("Failed to register signals_detected_total"),

            events_published: register_int_counter!(
                "telemetry_events_published_total",
                "Total number of events accepted by the sink"
            )
            .expect("Failed to register events_published_total"),

            publish_errors: register_int_counter_vec!(
                "telemetry_publish_errors_total",
                "Total number of failed publishes by failure kind",
                &["kind"]
            )
            .expect("Failed to register publish_errors_total"),

            scheduler_running: register_int_gauge!(
                "telemetry_scheduler_running",
                "1 while the polling scheduler is running"
            )
            .expect("Failed to register scheduler_running"),
        }
    }
}

/// Handle to the process-wide telemetry metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct TelemetryMetrics {
    _private: (),
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    /// Create a handle, registering the collectors on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TelemetryMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TelemetryMetricsInner {
        GLOBAL_METRICS.get_or_init(TelemetryMetricsInner::new)
    }

    pub fn observe_cycle(&self, duration_secs: f64) {
        self.inner().cycles.inc();
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn inc_empty_cycles(&self) {
        self.inner().empty_cycles.inc();
    }

    pub fn add_metrics_collected(&self, count: usize) {
        self.inner().metrics_collected.inc_by(count as u64);
    }

    pub fn inc_collection_errors(&self, source: &str) {
        self.inner()
            .collection_errors
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_signals_detected(&self, signal: &IncidentSignal) {
        self.inner()
            .signals_detected
            .with_label_values(&[signal.signal_type.as_str(), signal.severity.as_str()])
            .inc();
    }

    pub fn inc_events_published(&self) {
        self.inner().events_published.inc();
    }

    pub fn inc_publish_errors(&self, error: &PublishError) {
        self.inner()
            .publish_errors
            .with_label_values(&[error.kind()])
            .inc();
    }

    pub fn set_scheduler_running(&self, running: bool) {
        self.inner().scheduler_running.set(i64::from(running));
    }
}

/// Structured logger for pipeline events
///
/// Every record carries an `event` field and the service identity so log
/// pipelines can filter on them.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn log_startup(&self, version: &str, environment: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            environment = %environment,
            "Telemetry service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Telemetry service shutting down"
        );
    }

    pub fn log_signal(&self, detector: &str, signal: &IncidentSignal) {
        let namespace = signal.namespace.as_deref().unwrap_or("");
        if signal.severity >= Severity::High {
            warn!(
                event = "signal_detected",
                service = %self.service,
                detector = %detector,
                signal_type = %signal.signal_type,
                severity = %signal.severity,
                namespace = %namespace,
                resource = %signal.resource,
                details = %signal.message,
                "Incident signal detected"
            );
        } else {
            info!(
                event = "signal_detected",
                service = %self.service,
                detector = %detector,
                signal_type = %signal.signal_type,
                severity = %signal.severity,
                namespace = %namespace,
                resource = %signal.resource,
                details = %signal.message,
                "Incident signal detected"
            );
        }
    }

    pub fn log_published(&self, detector: &str, signal: &IncidentSignal, event_id: &str) {
        info!(
            event = "event_published",
            service = %self.service,
            detector = %detector,
            event_id = %event_id,
            signal_type = %signal.signal_type,
            severity = %signal.severity,
            resource = %signal.resource,
            "Event published"
        );
    }

    pub fn log_decision(&self, event_id: &str, decision: &Decision) {
        info!(
            event = "decision_received",
            service = %self.service,
            event_id = %event_id,
            decision = %decision.decision,
            message = %decision.message.as_deref().unwrap_or(""),
            "Decision received from sink"
        );
    }

    pub fn log_publish_failure(&self, detector: &str, signal: &IncidentSignal, error: &PublishError) {
        warn!(
            event = "publish_failed",
            service = %self.service,
            detector = %detector,
            signal_type = %signal.signal_type,
            resource = %signal.resource,
            failure = error.kind(),
            status = ?error.status(),
            error = %error,
            "Failed to publish event"
        );
    }
}
