//! Metrics for the event pipeline and approval lifecycle.
//!
//! [`EngineMetrics`] is an explicit struct built from an OpenTelemetry
//! [`Meter`] owned by the composition root and handed to the engine; there is
//! no global mutable registry. Without the `metrics` feature (no SDK
//! installed) the global meter is a no-op and recording costs nothing.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Metrics collector for event processing and approvals.
#[derive(Clone)]
pub struct EngineMetrics {
    /// Events processed, labelled by workflow result
    pub events_total: Counter<u64>,
    /// Verdicts produced, labelled by producer and decision
    pub verdicts_total: Counter<u64>,
    /// Approval records created
    pub approvals_created_total: Counter<u64>,
    /// Approvals resolved, labelled by terminal status
    pub approvals_resolved_total: Counter<u64>,
    /// Seconds from approval creation to resolution
    pub approval_latency_seconds: Histogram<f64>,
    /// Currently pending approvals (gauge via atomic)
    pub approvals_pending: Arc<AtomicI64>,
}

impl EngineMetrics {
    /// Builds the collector on a meter.
    #[must_use]
    pub fn new(meter: &Meter) -> Self {
        Self {
            events_total: meter
                .u64_counter("eventgate_events_total")
                .with_description("Events processed, by workflow result")
                .build(),
            verdicts_total: meter
                .u64_counter("eventgate_verdicts_total")
                .with_description("Producer verdicts, by producer and decision")
                .build(),
            approvals_created_total: meter
                .u64_counter("eventgate_approvals_created_total")
                .with_description("Approval records created")
                .build(),
            approvals_resolved_total: meter
                .u64_counter("eventgate_approvals_resolved_total")
                .with_description("Approvals resolved, by terminal status")
                .build(),
            approval_latency_seconds: meter
                .f64_histogram("eventgate_approval_latency_seconds")
                .with_description("Seconds from approval creation to resolution")
                .build(),
            approvals_pending: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Collector on the global meter. A no-op unless a meter provider is
    /// installed, which makes it the right default for tests and for builds
    /// without the exporter.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&opentelemetry::global::meter("eventgate"))
    }

    /// Records a processed event by result label.
    pub fn record_event(&self, result: &str) {
        self.events_total
            .add(1, &[KeyValue::new("result", result.to_string())]);
    }

    /// Records one producer verdict.
    pub fn record_verdict(&self, producer: &str, decision: &str) {
        self.verdicts_total.add(
            1,
            &[
                KeyValue::new("producer", producer.to_string()),
                KeyValue::new("decision", decision.to_string()),
            ],
        );
    }

    /// Records a new pending approval.
    pub fn record_created(&self) {
        self.approvals_created_total.add(1, &[]);
        self.approvals_pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a resolution with its terminal status and time-to-decision.
    pub fn record_resolved(&self, status: &str, latency_seconds: f64) {
        self.approvals_resolved_total
            .add(1, &[KeyValue::new("status", status.to_string())]);
        self.approval_latency_seconds.record(latency_seconds, &[]);
        self.approvals_pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current pending-approval count.
    #[must_use]
    pub fn pending_count(&self) -> i64 {
        self.approvals_pending.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("approvals_pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
