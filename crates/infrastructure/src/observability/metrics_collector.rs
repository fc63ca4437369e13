//! Metrics collector for the crawl master
//!
//! All handles are resolved once at construction; labelled counters are
//! resolved per call.

use std::net::SocketAddr;

use anyhow::Result;
use crawler_domain::{NodeCounts, StorageTier, TaskCounts};
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::info;

/// Metrics collector for the crawl master
#[derive(Clone)]
pub struct MetricsCollector {
    tasks_enqueued_total: Counter,
    tasks_assigned_total: Counter,
    tasks_completed_total: Counter,
    tasks_dead_total: Counter,
    reports_discarded_total: Counter,
    storage_failures_total: Counter,

    tasks_pending: Gauge,
    tasks_assigned: Gauge,
    nodes_active: Gauge,
    nodes_suspected: Gauge,
    nodes_failed: Gauge,
    inflight_writes: Gauge,

    scheduler_cycle_duration: Histogram,
    storage_write_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_enqueued_total: counter!("crawler_tasks_enqueued_total"),
            tasks_assigned_total: counter!("crawler_tasks_assigned_total"),
            tasks_completed_total: counter!("crawler_tasks_completed_total"),
            tasks_dead_total: counter!("crawler_tasks_dead_total"),
            reports_discarded_total: counter!("crawler_reports_discarded_total"),
            storage_failures_total: counter!("crawler_storage_failures_total"),
            tasks_pending: gauge!("crawler_tasks_pending"),
            tasks_assigned: gauge!("crawler_tasks_assigned"),
            nodes_active: gauge!("crawler_nodes_active"),
            nodes_suspected: gauge!("crawler_nodes_suspected"),
            nodes_failed: gauge!("crawler_nodes_failed"),
            inflight_writes: gauge!("crawler_storage_inflight_writes"),
            scheduler_cycle_duration: histogram!("crawler_scheduler_cycle_duration_seconds"),
            storage_write_duration: histogram!("crawler_storage_write_duration_seconds"),
        }
    }

    pub fn record_tasks_enqueued(&self, count: u64) {
        self.tasks_enqueued_total.increment(count);
    }

    pub fn record_task_assigned(&self) {
        self.tasks_assigned_total.increment(1);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed_total.increment(1);
    }

    pub fn record_task_requeued(&self, reason: &str) {
        counter!("crawler_tasks_requeued_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_task_dead(&self) {
        self.tasks_dead_total.increment(1);
    }

    pub fn record_report_discarded(&self) {
        self.reports_discarded_total.increment(1);
    }

    pub fn record_storage_write(&self, tier: StorageTier, duration_seconds: f64) {
        let tier = match tier {
            StorageTier::Primary => "primary",
            StorageTier::Fallback => "fallback",
        };
        counter!("crawler_storage_writes_total", "tier" => tier).increment(1);
        self.storage_write_duration.record(duration_seconds);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures_total.increment(1);
    }

    pub fn record_cycle(&self, duration_seconds: f64) {
        self.scheduler_cycle_duration.record(duration_seconds);
    }

    pub fn update_state(&self, tasks: &TaskCounts, nodes: &NodeCounts, inflight: usize) {
        self.tasks_pending.set(tasks.pending as f64);
        self.tasks_assigned.set(tasks.assigned as f64);
        self.nodes_active.set(nodes.active as f64);
        self.nodes_suspected.set(nodes.suspected as f64);
        self.nodes_failed.set(nodes.failed as f64);
        self.inflight_writes.set(inflight as f64);
    }
}

/// Install the Prometheus recorder with an HTTP scrape listener
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(bind_address: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Metrics initialized with Prometheus exporter on {}", bind_address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_works_without_recorder() {
        let collector = MetricsCollector::new();
        collector.record_task_assigned();
        collector.record_task_requeued("timeout");
        collector.record_storage_write(StorageTier::Fallback, 0.01);
        collector.update_state(&TaskCounts::default(), &NodeCounts::default(), 0);
    }
}
