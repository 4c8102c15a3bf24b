//! Metrics for the chainhook ingestion pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec, HistogramVec,
    IntGaugeVec,
};

/// Labels for pipeline metrics
pub const STREAM_LABEL: &str = "stream";
pub const KIND_LABEL: &str = "kind";
pub const STATUS_LABEL: &str = "status";
pub const DECISION_LABEL: &str = "decision";
pub const STAGE_LABEL: &str = "stage";
pub const HANDLER_LABEL: &str = "handler";
pub const MODE_LABEL: &str = "mode";
pub const REASON_LABEL: &str = "reason";

lazy_static! {
    /// Number of payloads received, by payload kind
    static ref PAYLOADS_RECEIVED: CounterVec = register_counter_vec!(
        "chainhook_payloads_received_total",
        "Total number of chainhook payloads received",
        &[STREAM_LABEL, KIND_LABEL]
    ).expect("Failed to create payloads_received metric");

    /// Acknowledgements returned to the transport
    static ref ACKNOWLEDGEMENTS: CounterVec = register_counter_vec!(
        "chainhook_acknowledgements_total",
        "Total number of webhook acknowledgements by status",
        &[STREAM_LABEL, STATUS_LABEL]
    ).expect("Failed to create acknowledgements metric");

    /// Tip validation decisions
    static ref TRACKER_DECISIONS: CounterVec = register_counter_vec!(
        "chainhook_tracker_decisions_total",
        "Total number of chain-tip validation decisions",
        &[STREAM_LABEL, KIND_LABEL, DECISION_LABEL]
    ).expect("Failed to create tracker_decisions metric");

    /// Pipeline stage transitions
    static ref STAGE_TRANSITIONS: CounterVec = register_counter_vec!(
        "chainhook_stage_transitions_total",
        "Total number of pipeline stage transitions",
        &[STREAM_LABEL, STAGE_LABEL]
    ).expect("Failed to create stage_transitions metric");

    /// Handler invocations by outcome
    static ref HANDLER_INVOCATIONS: CounterVec = register_counter_vec!(
        "chainhook_handler_invocations_total",
        "Total number of handler invocations",
        &[HANDLER_LABEL, MODE_LABEL, STATUS_LABEL]
    ).expect("Failed to create handler_invocations metric");

    /// Handler retries
    static ref HANDLER_RETRIES: CounterVec = register_counter_vec!(
        "chainhook_handler_retries_total",
        "Total number of handler retries after transient failures",
        &[HANDLER_LABEL, REASON_LABEL]
    ).expect("Failed to create handler_retries metric");

    /// Gap backfill attempts
    static ref BACKFILL_ATTEMPTS: CounterVec = register_counter_vec!(
        "chainhook_backfill_attempts_total",
        "Total number of gap backfill attempts",
        &[STREAM_LABEL, STATUS_LABEL]
    ).expect("Failed to create backfill_attempts metric");

    /// Operational alerts
    static ref OPERATIONAL_ALERTS: CounterVec = register_counter_vec!(
        "chainhook_operational_alerts_total",
        "Total number of operational alerts raised",
        &[STREAM_LABEL, KIND_LABEL]
    ).expect("Failed to create operational_alerts metric");

    /// Current tip height
    static ref TIP_HEIGHT: IntGaugeVec = register_int_gauge_vec!(
        "chainhook_tip_height",
        "Height of the committed chain tip",
        &[STREAM_LABEL]
    ).expect("Failed to create tip_height metric");

    /// Payloads parked while their gap is unresolved
    static ref PARKED_PAYLOADS: IntGaugeVec = register_int_gauge_vec!(
        "chainhook_parked_payloads",
        "Number of payloads parked awaiting gap resolution",
        &[STREAM_LABEL]
    ).expect("Failed to create parked_payloads metric");

    /// Dispatch duration
    static ref DISPATCH_DURATION: HistogramVec = register_histogram_vec!(
        "chainhook_dispatch_duration_seconds",
        "Time spent dispatching a payload to handlers",
        &[MODE_LABEL]
    ).expect("Failed to create dispatch_duration metric");
}

/// Pipeline metrics
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Get global metrics instance
    pub fn global() -> Self {
        PipelineMetrics
    }

    pub fn record_handler_invocation(&self, handler: &str, mode: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        HANDLER_INVOCATIONS
            .with_label_values(&[handler, mode, status])
            .inc();
    }

    pub fn record_handler_retry(&self, handler: &str, reason: &str) {
        HANDLER_RETRIES.with_label_values(&[handler, reason]).inc();
    }

    pub fn record_dispatch_duration(&self, mode: &str, duration_secs: f64) {
        DISPATCH_DURATION
            .with_label_values(&[mode])
            .observe(duration_secs);
    }
}

/// Metrics context for one tip stream
pub struct PipelineMetricsContext {
    stream: String,
}

impl PipelineMetricsContext {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
        }
    }

    pub fn payload_received(&self, kind: &str) {
        PAYLOADS_RECEIVED
            .with_label_values(&[&self.stream, kind])
            .inc();
    }

    pub fn acknowledgement(&self, status: &str) {
        ACKNOWLEDGEMENTS
            .with_label_values(&[&self.stream, status])
            .inc();
    }

    pub fn decision(&self, kind: &str, decision: &str) {
        TRACKER_DECISIONS
            .with_label_values(&[&self.stream, kind, decision])
            .inc();
    }

    pub fn stage(&self, stage: &str) {
        STAGE_TRANSITIONS
            .with_label_values(&[&self.stream, stage])
            .inc();
    }

    pub fn backfill_attempt(&self, status: &str) {
        BACKFILL_ATTEMPTS
            .with_label_values(&[&self.stream, status])
            .inc();
    }

    pub fn alert(&self, kind: &str) {
        OPERATIONAL_ALERTS
            .with_label_values(&[&self.stream, kind])
            .inc();
    }

    /// Alerts of `kind` raised so far for this stream
    pub fn alerts_raised(&self, kind: &str) -> u64 {
        OPERATIONAL_ALERTS
            .with_label_values(&[&self.stream, kind])
            .get() as u64
    }

    pub fn tip_height(&self, height: u64) {
        TIP_HEIGHT
            .with_label_values(&[&self.stream])
            .set(height as i64);
    }

    pub fn parked_payloads(&self, count: usize) {
        PARKED_PAYLOADS
            .with_label_values(&[&self.stream])
            .set(count as i64);
    }
}
