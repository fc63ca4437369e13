use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crawler_core::{CrawlerResult, MasterConfig};
use crawler_domain::{
    normalize_url, Heartbeat, MonitoringSnapshot, Node, NodeId, NodeStatus, StorageStats,
    StorageTier, Task, TaskAssignment, TaskCounts, TaskId, TaskSource, TaskState, TaskTransition,
};
use crawler_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::node_registry::{HeartbeatOutcome, NodeRegistry};
use crate::strategies::NodeSelectionStrategy;
use crate::task_registry::{RecrawlOutcome, RequeueOutcome, TaskRegistry};

pub type SharedClusterState = Arc<Mutex<ClusterState>>;

/// 任务重新入队的原因标签
pub mod requeue_reason {
    pub const TIMEOUT: &str = "timeout";
    pub const WORKER_FAILURE: &str = "worker_failure";
    pub const REPORTED_FAILURE: &str = "reported_failure";
    pub const STORAGE_FATAL: &str = "storage_fatal";
    pub const NODE_RESTARTED: &str = "node_restarted";
}

/// 集群状态: 任务注册表与节点注册表
///
/// 跨注册表的不变量 (节点失效释放任务、超时释放、分配) 都在单个方法内完成,
/// 调用方持有同一把锁。
pub struct ClusterState {
    tasks: TaskRegistry,
    nodes: NodeRegistry,
    transitions: VecDeque<TaskTransition>,
    transitions_limit: usize,
    storage: StorageStats,
    discarded_reports: u64,
    metrics: MetricsCollector,
}

impl ClusterState {
    pub fn new(config: &MasterConfig, metrics: MetricsCollector) -> Self {
        Self {
            tasks: TaskRegistry::new(config.max_attempts, config.task_timeout()),
            nodes: NodeRegistry::new(),
            transitions: VecDeque::new(),
            transitions_limit: config.recent_transitions_limit,
            storage: StorageStats::default(),
            discarded_reports: 0,
            metrics,
        }
    }

    pub fn shared(self) -> SharedClusterState {
        Arc::new(Mutex::new(self))
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    pub fn task_counts(&self) -> TaskCounts {
        self.tasks.counts()
    }

    /// 规范化并加入新URL, 已存在时返回 None
    pub fn enqueue_url(
        &mut self,
        raw_url: &str,
        source: TaskSource,
        now: DateTime<Utc>,
    ) -> CrawlerResult<Option<TaskId>> {
        let url = normalize_url(raw_url)?;
        let task = Task::new(&url, source, now)?;
        let id = task.id.clone();

        if !self.tasks.enqueue(task) {
            return Ok(None);
        }

        StructuredLogger::log_task_enqueued(&id, &url, source);
        self.metrics.record_tasks_enqueued(1);
        self.push_transition(&id, &url, None, TaskState::Pending, None, "enqueued", now);
        Ok(Some(id))
    }

    pub fn recrawl(
        &mut self,
        raw_url: &str,
        now: DateTime<Utc>,
    ) -> CrawlerResult<(TaskId, RecrawlOutcome)> {
        let previous = normalize_url(raw_url)
            .ok()
            .and_then(|url| self.tasks.get(&TaskId::from_normalized_url(&url)))
            .map(|t| t.state);

        let (id, outcome) = self.tasks.recrawl(raw_url, now)?;
        if outcome != RecrawlOutcome::AlreadyActive {
            let url = self.tasks.get(&id).map(|t| t.url.clone()).unwrap_or_default();
            StructuredLogger::log_task_enqueued(&id, &url, TaskSource::Recrawl);
            self.metrics.record_tasks_enqueued(1);
            self.push_transition(&id, &url, previous, TaskState::Pending, None, "recrawl", now);
        }
        Ok((id, outcome))
    }

    /// 显式注册节点, 返回生命周期序号
    ///
    /// 仍在线的节点重新注册说明进程已重启, 其持有的任务重新入队。
    pub fn register_node(&mut self, node_id: &NodeId, now: DateTime<Utc>) -> u32 {
        let (lifetime, released) = self.nodes.register(node_id, now);
        StructuredLogger::log_node_registered(node_id, lifetime);

        if let Some(task_id) = released {
            if self.owned_by(&task_id, node_id, None) {
                if let Err(e) =
                    self.requeue_task(&task_id, requeue_reason::NODE_RESTARTED, "节点重新注册", now)
                {
                    debug!("释放重启节点的任务失败 {}: {}", task_id, e);
                }
            }
        }
        lifetime
    }

    pub fn heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        now: DateTime<Utc>,
    ) -> CrawlerResult<HeartbeatOutcome> {
        let outcome = self
            .nodes
            .register_or_touch(&heartbeat.node_id, heartbeat.timestamp, now)?;

        match outcome {
            HeartbeatOutcome::Registered => {
                StructuredLogger::log_node_registered(&heartbeat.node_id, 1)
            }
            HeartbeatOutcome::Recovered => StructuredLogger::log_node_status_change(
                &heartbeat.node_id,
                NodeStatus::Suspected,
                NodeStatus::Active,
                0,
            ),
            HeartbeatOutcome::Refreshed => {}
        }
        Ok(outcome)
    }

    /// 把等待中的任务分配给空闲的 Active 节点, 直到其中一方耗尽
    pub fn assign_next(
        &mut self,
        strategy: &dyn NodeSelectionStrategy,
        now: DateTime<Utc>,
    ) -> Vec<(NodeId, TaskAssignment)> {
        let mut assigned = Vec::new();

        loop {
            let idle: Vec<&Node> = self.nodes.idle_active();
            let eligible: Vec<NodeId> = idle.iter().map(|n| n.id.clone()).collect();

            let Some(task_id) = self.tasks.dequeue_next(&eligible) else {
                break;
            };
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            let Some(node_id) = strategy.select_node(task, &idle) else {
                self.tasks.restore_front(task_id);
                break;
            };

            let assignment = match self.tasks.mark_assigned(&task_id, &node_id, now) {
                Ok(assignment) => assignment,
                Err(e) => {
                    debug!("跳过无法分配的任务 {}: {}", task_id, e);
                    continue;
                }
            };
            if let Err(e) = self.nodes.set_current_task(&node_id, &task_id, now) {
                debug!("节点 {} 无法接收任务: {}", node_id, e);
                continue;
            }

            StructuredLogger::log_task_assigned(
                &task_id,
                &assignment.url,
                &node_id,
                assignment.attempt,
                assignment.deadline,
            );
            self.metrics.record_task_assigned();
            self.push_transition(
                &task_id,
                &assignment.url,
                Some(TaskState::Pending),
                TaskState::Assigned,
                Some(node_id.clone()),
                "assigned",
                now,
            );
            assigned.push((node_id, assignment));
        }

        assigned
    }

    /// 接受成功上报: 校验归属, 释放节点, 为内容写入延长期限
    ///
    /// 任务保持 Assigned 直到写入结果返回。返回任务的URL。
    pub fn accept_success(
        &mut self,
        task_id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> CrawlerResult<String> {
        let url = self.tasks.verify_owner(task_id, node_id, assignment_id)?.url.clone();
        self.nodes.clear_current_task(node_id, task_id);
        self.tasks.extend_deadline(task_id, now)?;
        Ok(url)
    }

    /// 内容写入成功后标记完成
    pub fn complete(
        &mut self,
        task_id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
        tier: StorageTier,
        now: DateTime<Utc>,
    ) -> CrawlerResult<()> {
        let url = self
            .tasks
            .mark_completed(task_id, node_id, assignment_id)?
            .url
            .clone();

        self.nodes.clear_current_task(node_id, task_id);
        self.nodes.record_completed(node_id);
        match tier {
            StorageTier::Primary => self.storage.primary_writes += 1,
            StorageTier::Fallback => self.storage.fallback_writes += 1,
        }

        StructuredLogger::log_task_completed(task_id, node_id, tier);
        self.metrics.record_task_completed();
        self.push_transition(
            task_id,
            &url,
            Some(TaskState::Assigned),
            TaskState::Completed,
            Some(node_id.clone()),
            "completed",
            now,
        );
        Ok(())
    }

    /// 工作节点上报失败, 任务立即重新入队
    pub fn fail_report(
        &mut self,
        task_id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
        error: &str,
        now: DateTime<Utc>,
    ) -> CrawlerResult<RequeueOutcome> {
        self.tasks.verify_owner(task_id, node_id, assignment_id)?;
        self.nodes.clear_current_task(node_id, task_id);
        self.nodes.record_failed(node_id);
        self.requeue_task(task_id, requeue_reason::REPORTED_FAILURE, error, now)
    }

    /// 内容无法写入任何存储层, 按工作节点失败处理
    pub fn storage_fatal(
        &mut self,
        task_id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
        error: &str,
        now: DateTime<Utc>,
    ) -> CrawlerResult<RequeueOutcome> {
        self.storage.failed_writes += 1;
        StructuredLogger::log_storage_fatal(task_id, error);
        self.tasks.verify_owner(task_id, node_id, assignment_id)?;
        self.nodes.clear_current_task(node_id, task_id);
        self.requeue_task(task_id, requeue_reason::STORAGE_FATAL, error, now)
    }

    /// Active → Suspected; 节点保留已分配的任务
    pub fn suspect_node(&mut self, node_id: &NodeId, silence_seconds: i64) -> CrawlerResult<bool> {
        let changed = self.nodes.mark_suspected(node_id)?;
        if changed {
            StructuredLogger::log_node_status_change(
                node_id,
                NodeStatus::Active,
                NodeStatus::Suspected,
                silence_seconds,
            );
        }
        Ok(changed)
    }

    /// 标记节点失效, 同时把它持有的任务放回队列
    pub fn fail_node(
        &mut self,
        node_id: &NodeId,
        silence_seconds: i64,
        now: DateTime<Utc>,
    ) -> CrawlerResult<Option<RequeueOutcome>> {
        let from = self
            .nodes
            .get(node_id)
            .map(|n| n.status)
            .unwrap_or(NodeStatus::Active);

        let Some(released) = self.nodes.mark_failed(node_id)? else {
            return Ok(None);
        };
        StructuredLogger::log_node_status_change(node_id, from, NodeStatus::Failed, silence_seconds);

        let outcome = match released {
            Some(task_id) if self.owned_by(&task_id, node_id, None) => self
                .requeue_task(
                    &task_id,
                    requeue_reason::WORKER_FAILURE,
                    "节点失效",
                    now,
                )
                .ok(),
            _ => None,
        };
        Ok(outcome)
    }

    /// 执行期限已过, 任务重新入队; 不改变节点状态
    pub fn timeout_task(
        &mut self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> CrawlerResult<RequeueOutcome> {
        if let Some(node_id) = self.tasks.get(task_id).and_then(|t| t.assigned_node.clone()) {
            self.nodes.clear_current_task(&node_id, task_id);
        }
        self.requeue_task(task_id, requeue_reason::TIMEOUT, "执行超时", now)
    }

    pub fn record_discarded(&mut self, task_id: &str, node_id: &NodeId, reason: &str) {
        self.discarded_reports += 1;
        self.metrics.record_report_discarded();
        StructuredLogger::log_report_discarded(task_id, node_id, reason);
    }

    pub fn snapshot(&self, now: DateTime<Utc>, inflight_writes: usize) -> MonitoringSnapshot {
        MonitoringSnapshot {
            generated_at: now,
            tasks: self.tasks.counts(),
            nodes: self.nodes.counts(),
            recent_transitions: self.transitions.iter().cloned().collect(),
            node_stats: self.nodes.summaries(),
            storage: self.storage,
            discarded_reports: self.discarded_reports,
            inflight_writes,
        }
    }

    fn owned_by(&self, task_id: &TaskId, node_id: &NodeId, assignment_id: Option<Uuid>) -> bool {
        self.tasks.verify_owner(task_id, node_id, assignment_id).is_ok()
    }

    fn requeue_task(
        &mut self,
        task_id: &TaskId,
        reason: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> CrawlerResult<RequeueOutcome> {
        let node_id = self.tasks.get(task_id).and_then(|t| t.assigned_node.clone());
        let outcome = self.tasks.requeue(task_id, &format!("{reason}: {detail}"))?;

        self.metrics.record_task_requeued(reason);
        let to = if outcome.dead {
            let last_error = self.tasks.get(task_id).and_then(|t| t.last_error.clone());
            StructuredLogger::log_task_dead(
                task_id,
                &outcome.url,
                outcome.attempts,
                last_error.as_deref(),
            );
            self.metrics.record_task_dead();
            TaskState::Dead
        } else {
            StructuredLogger::log_task_requeued(task_id, reason, outcome.attempts);
            TaskState::Pending
        };

        self.push_transition(
            task_id,
            &outcome.url,
            Some(TaskState::Assigned),
            to,
            node_id,
            reason,
            now,
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_transition(
        &mut self,
        task_id: &TaskId,
        url: &str,
        from: Option<TaskState>,
        to: TaskState,
        node_id: Option<NodeId>,
        reason: &str,
        at: DateTime<Utc>,
    ) {
        if self.transitions_limit == 0 {
            return;
        }
        while self.transitions.len() >= self.transitions_limit {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TaskTransition {
            task_id: task_id.clone(),
            url: url.to_string(),
            from,
            to,
            node_id,
            reason: reason.to_string(),
            at,
        });
    }
}
