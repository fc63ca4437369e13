use std::sync::Arc;

use chrono::Utc;
use crawler_core::{CrawlerError, CrawlerResult};
use crawler_domain::{
    Heartbeat, MonitoringSnapshot, NodeId, NodeStatus, NodeSummary, Task, TaskAssignment, TaskId,
    TaskReport, TaskSource,
};
use crawler_infrastructure::{InMemoryAssignmentOutbox, OutboxStats};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::node_registry::HeartbeatOutcome;
use crate::scheduler::ReportSender;
use crate::state::SharedClusterState;
use crate::task_registry::RecrawlOutcome;

/// 单次轮询最多取走的分配数
pub const MAX_ASSIGNMENTS_PER_POLL: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub node_id: NodeId,
    pub lifetime: u32,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueSummary {
    pub accepted: Vec<TaskId>,
    pub duplicates: usize,
    pub rejected: Vec<String>,
}

/// 主节点对外操作的门面, HTTP 层只依赖它
#[derive(Clone)]
pub struct MasterController {
    state: SharedClusterState,
    outbox: Arc<InMemoryAssignmentOutbox>,
    reports: ReportSender,
    snapshots: watch::Receiver<MonitoringSnapshot>,
    heartbeat_interval_seconds: u64,
}

impl MasterController {
    pub fn new(
        state: SharedClusterState,
        outbox: Arc<InMemoryAssignmentOutbox>,
        reports: ReportSender,
        snapshots: watch::Receiver<MonitoringSnapshot>,
        heartbeat_interval_seconds: u64,
    ) -> Self {
        Self {
            state,
            outbox,
            reports,
            snapshots,
            heartbeat_interval_seconds,
        }
    }

    /// 节点开始新的生命周期, 丢弃上一生命周期遗留的分配
    pub async fn register_node(&self, node_id: &NodeId) -> CrawlerResult<RegistrationResponse> {
        if node_id.is_empty() {
            return Err(CrawlerError::protocol("节点ID不能为空"));
        }

        self.outbox.purge(node_id).await;
        let lifetime = self.state.lock().await.register_node(node_id, Utc::now());

        Ok(RegistrationResponse {
            node_id: node_id.clone(),
            lifetime,
            heartbeat_interval_seconds: self.heartbeat_interval_seconds,
        })
    }

    pub async fn heartbeat(&self, heartbeat: Heartbeat) -> CrawlerResult<HeartbeatOutcome> {
        if heartbeat.node_id.is_empty() {
            return Err(CrawlerError::protocol("心跳缺少 node_id"));
        }
        self.state.lock().await.heartbeat(&heartbeat, Utc::now())
    }

    /// 取走节点的待处理分配; Failed 节点必须先重新注册
    pub async fn poll_assignments(&self, node_id: &NodeId) -> CrawlerResult<Vec<TaskAssignment>> {
        let status = self
            .state
            .lock()
            .await
            .nodes()
            .get(node_id)
            .map(|node| node.status);

        if status == Some(NodeStatus::Failed) {
            return Err(CrawlerError::NodeFailed {
                id: node_id.to_string(),
            });
        }

        let assignments = self.outbox.drain(node_id, MAX_ASSIGNMENTS_PER_POLL).await;
        if !assignments.is_empty() {
            debug!("节点 {} 取走 {} 个分配", node_id, assignments.len());
        }
        Ok(assignments)
    }

    /// 校验后放入上报队列, 由调度周期处理
    pub fn submit_report(&self, report: TaskReport) -> CrawlerResult<()> {
        report.validate()?;
        self.reports.submit(report)
    }

    pub async fn enqueue_urls(&self, urls: &[String], source: TaskSource) -> EnqueueSummary {
        let now = Utc::now();
        let mut summary = EnqueueSummary::default();
        let mut state = self.state.lock().await;

        for url in urls {
            match state.enqueue_url(url, source, now) {
                Ok(Some(task_id)) => summary.accepted.push(task_id),
                Ok(None) => summary.duplicates += 1,
                Err(e) => {
                    debug!("拒绝URL {}: {}", url, e);
                    summary.rejected.push(url.clone());
                }
            }
        }

        if !summary.accepted.is_empty() {
            info!(
                "加入 {} 个任务 (重复 {}, 拒绝 {})",
                summary.accepted.len(),
                summary.duplicates,
                summary.rejected.len()
            );
        }
        summary
    }

    pub async fn recrawl(&self, url: &str) -> CrawlerResult<(TaskId, RecrawlOutcome)> {
        self.state.lock().await.recrawl(url, Utc::now())
    }

    pub async fn task(&self, raw_id: &str) -> CrawlerResult<Task> {
        let task_id = TaskId::parse(raw_id)?;
        self.state
            .lock()
            .await
            .task(&task_id)
            .ok_or_else(|| CrawlerError::task_not_found(raw_id))
    }

    pub async fn nodes(&self) -> Vec<NodeSummary> {
        self.state.lock().await.nodes().summaries()
    }

    /// 最近一次发布的监控快照
    pub fn snapshot(&self) -> MonitoringSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn outbox_stats(&self) -> OutboxStats {
        self.outbox.stats().await
    }
}
