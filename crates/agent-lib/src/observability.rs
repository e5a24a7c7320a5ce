//! Observability infrastructure for the cluster agent
//!
//! Provides:
//! - Prometheus metrics (report latency, batch outcomes, cache sizes, tombstones)
//! - Structured JSON logging with tracing

use crate::collector::{CycleOutcome, CycleReport};
use crate::models::ResourceKind;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// `cache` label values of the identifier cache gauge
pub mod caches {
    pub const PRIMARY: &str = "primary";
    /// Records nested under a parent, e.g. virtual-node pods
    pub const NESTED: &str = "nested";
}

/// Histogram buckets for report round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    report_latency_seconds: HistogramVec,
    cycle_duration_seconds: HistogramVec,
    reports_total: IntCounterVec,
    objects_reported_total: IntCounterVec,
    tombstones_total: IntCounterVec,
    cache_entries: IntGaugeVec,
    cache_resets_total: IntCounterVec,
    cycles_skipped_total: IntCounterVec,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            report_latency_seconds: register_histogram_vec!(
                "cluster_agent_report_latency_seconds",
                "Round trip time of report batches",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register report_latency_seconds"),

            cycle_duration_seconds: register_histogram_vec!(
                "cluster_agent_cycle_duration_seconds",
                "Duration of a full collect/diff/report/sweep cycle",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            reports_total: register_int_counter_vec!(
                "cluster_agent_reports_total",
                "Report batches by kind, batch type and outcome",
                &["kind", "batch", "outcome"]
            )
            .expect("Failed to register reports_total"),

            objects_reported_total: register_int_counter_vec!(
                "cluster_agent_objects_reported_total",
                "Snapshots sent, split by full and reference payloads",
                &["kind", "payload"]
            )
            .expect("Failed to register objects_reported_total"),

            tombstones_total: register_int_counter_vec!(
                "cluster_agent_tombstones_total",
                "Tombstones emitted for deleted objects",
                &["kind"]
            )
            .expect("Failed to register tombstones_total"),

            cache_entries: register_int_gauge_vec!(
                "cluster_agent_cache_entries",
                "Entries in the identifier cache",
                &["kind", "cache"]
            )
            .expect("Failed to register cache_entries"),

            cache_resets_total: register_int_counter_vec!(
                "cluster_agent_cache_resets_total",
                "Identifier cache resets caused by report failures",
                &["kind"]
            )
            .expect("Failed to register cache_resets_total"),

            cycles_skipped_total: register_int_counter_vec!(
                "cluster_agent_cycles_skipped_total",
                "Cycles skipped because no watch source was available",
                &["kind"]
            )
            .expect("Failed to register cycles_skipped_total"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_report_latency(&self, kind: ResourceKind, duration_secs: f64) {
        self.inner()
            .report_latency_seconds
            .with_label_values(&[kind.resource_name()])
            .observe(duration_secs);
    }

    pub fn observe_cycle_duration(&self, kind: ResourceKind, duration_secs: f64) {
        self.inner()
            .cycle_duration_seconds
            .with_label_values(&[kind.resource_name()])
            .observe(duration_secs);
    }

    /// Count a delivered or failed batch; `live` is false for tombstones
    pub fn inc_report(&self, kind: ResourceKind, live: bool, success: bool) {
        let batch = if live { "live" } else { "tombstone" };
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .reports_total
            .with_label_values(&[kind.resource_name(), batch, outcome])
            .inc();
    }

    pub fn add_objects_reported(&self, kind: ResourceKind, full: usize, references: usize) {
        let inner = self.inner();
        inner
            .objects_reported_total
            .with_label_values(&[kind.resource_name(), "full"])
            .inc_by(full as u64);
        inner
            .objects_reported_total
            .with_label_values(&[kind.resource_name(), "reference"])
            .inc_by(references as u64);
    }

    pub fn add_tombstones(&self, kind: ResourceKind, count: usize) {
        self.inner()
            .tombstones_total
            .with_label_values(&[kind.resource_name()])
            .inc_by(count as u64);
    }

    pub fn set_cache_entries(&self, kind: ResourceKind, cache: &str, entries: usize) {
        self.inner()
            .cache_entries
            .with_label_values(&[kind.resource_name(), cache])
            .set(entries as i64);
    }

    pub fn inc_cache_resets(&self, kind: ResourceKind) {
        self.inner()
            .cache_resets_total
            .with_label_values(&[kind.resource_name()])
            .inc();
    }

    pub fn inc_cycles_skipped(&self, kind: ResourceKind) {
        self.inner()
            .cycles_skipped_total
            .with_label_values(&[kind.resource_name()])
            .inc();
    }
}

/// Structured logger for agent events
///
/// Emits event-style records for lifecycle changes and sync cycles.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, kinds: &[ResourceKind]) {
        let kinds: Vec<&str> = kinds.iter().map(|k| k.resource_name()).collect();
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            kinds = %kinds.join(","),
            "Cluster agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Cluster agent shutting down"
        );
    }

    /// Log the outcome of one collector cycle
    pub fn log_cycle(&self, report: &CycleReport) {
        match &report.outcome {
            CycleOutcome::Skipped => {
                warn!(
                    event = "sync_cycle",
                    node = %self.node_name,
                    kind = %report.kind,
                    "Watch source unavailable, cycle skipped"
                );
            }
            CycleOutcome::Completed(stats) if stats.delivered() => {
                info!(
                    event = "sync_cycle",
                    node = %self.node_name,
                    kind = %report.kind,
                    observed = stats.observed,
                    full = stats.full,
                    tombstones = stats.tombstones,
                    "Sync cycle complete"
                );
            }
            CycleOutcome::Completed(stats) => {
                warn!(
                    event = "sync_cycle",
                    node = %self.node_name,
                    kind = %report.kind,
                    observed = stats.observed,
                    live_delivered = stats.live_delivered,
                    tombstones_delivered = stats.tombstones_delivered,
                    "Sync cycle finished with delivery failures"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_creation() {
        let metrics = AgentMetrics::new();

        metrics.observe_report_latency(ResourceKind::Pod, 0.01);
        metrics.observe_cycle_duration(ResourceKind::Pod, 0.02);
        metrics.inc_report(ResourceKind::Pod, true, true);
        metrics.add_objects_reported(ResourceKind::Pod, 3, 7);
        metrics.add_tombstones(ResourceKind::Service, 1);
        metrics.set_cache_entries(ResourceKind::Pod, caches::PRIMARY, 10);
        metrics.inc_cache_resets(ResourceKind::Pod);
        metrics.inc_cycles_skipped(ResourceKind::Node);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
