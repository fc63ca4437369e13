//! Structured logging utilities
//!
//! Every helper emits a fixed `event` field so log pipelines can filter on it.

use chrono::{DateTime, Utc};
use crawler_core::ErrorCategory;
use crawler_domain::{ContentKey, NodeId, NodeStatus, StorageTier, TaskId, TaskSource};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_enqueued(task_id: &TaskId, url: &str, source: TaskSource) {
        debug!(
            event = "task_enqueued",
            task.id = %task_id,
            task.url = url,
            task.source = ?source,
            "Task enqueued"
        );
    }

    pub fn log_task_assigned(
        task_id: &TaskId,
        url: &str,
        node_id: &NodeId,
        attempt: u32,
        deadline: DateTime<Utc>,
    ) {
        info!(
            event = "task_assigned",
            task.id = %task_id,
            task.url = url,
            node.id = %node_id,
            task.attempt = attempt,
            task.deadline = %deadline,
            "Task assigned to node"
        );
    }

    pub fn log_task_completed(task_id: &TaskId, node_id: &NodeId, tier: StorageTier) {
        info!(
            event = "task_completed",
            task.id = %task_id,
            node.id = %node_id,
            storage.tier = ?tier,
            "Task completed and content persisted"
        );
    }

    pub fn log_task_requeued(task_id: &TaskId, reason: &str, attempts: u32) {
        warn!(
            event = "task_requeued",
            task.id = %task_id,
            task.reason = reason,
            task.attempts = attempts,
            "Task returned to queue"
        );
    }

    pub fn log_task_dead(task_id: &TaskId, url: &str, attempts: u32, last_error: Option<&str>) {
        error!(
            event = "task_dead",
            task.id = %task_id,
            task.url = url,
            task.attempts = attempts,
            task.error = last_error.unwrap_or("unknown"),
            error.category = ?ErrorCategory::TaskPermanentFailure,
            "Task exhausted its attempts"
        );
    }

    pub fn log_node_registered(node_id: &NodeId, lifetime: u32) {
        info!(
            event = "node_registered",
            node.id = %node_id,
            node.lifetime = lifetime,
            "Node registered"
        );
    }

    pub fn log_node_status_change(
        node_id: &NodeId,
        from: NodeStatus,
        to: NodeStatus,
        silence_seconds: i64,
    ) {
        match to {
            NodeStatus::Failed => error!(
                event = "node_status_changed",
                node.id = %node_id,
                node.from = %from,
                node.to = %to,
                node.silence_seconds = silence_seconds,
                error.category = ?ErrorCategory::WorkerFailure,
                "Node declared failed"
            ),
            _ => warn!(
                event = "node_status_changed",
                node.id = %node_id,
                node.from = %from,
                node.to = %to,
                node.silence_seconds = silence_seconds,
                "Node status changed"
            ),
        }
    }

    pub fn log_storage_degraded(key: &ContentKey, primary_error: &str) {
        warn!(
            event = "storage_degraded",
            content.key = %key,
            storage.primary_error = primary_error,
            "Primary store failed, content written to local fallback"
        );
    }

    pub fn log_storage_fatal(task_id: &TaskId, error_message: &str) {
        error!(
            event = "storage_fatal",
            task.id = %task_id,
            storage.error = error_message,
            error.category = ?ErrorCategory::StorageFatal,
            "Content could not be persisted to any tier"
        );
    }

    pub fn log_report_discarded(task_id: &str, node_id: &NodeId, reason: &str) {
        warn!(
            event = "report_discarded",
            task.id = task_id,
            node.id = %node_id,
            report.reason = reason,
            "Task report discarded"
        );
    }
}
