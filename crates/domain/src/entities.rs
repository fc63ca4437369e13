use std::fmt;

use chrono::{DateTime, Utc};
use crawler_core::CrawlerResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{normalize_url, NodeId, TaskId};

/// 爬取任务, 一个规范化URL对应一个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub state: TaskState,
    pub source: TaskSource,
    pub assigned_node: Option<NodeId>,
    /// 每次分配生成新的租约标识, 用于识别迟到的上报
    pub assignment_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub timeout_override_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "DEAD")]
    Dead,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Assigned => "ASSIGNED",
            TaskState::Completed => "COMPLETED",
            TaskState::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Dead)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Seed,
    Discovered,
    Recrawl,
}

impl Task {
    pub fn new(raw_url: &str, source: TaskSource, now: DateTime<Utc>) -> CrawlerResult<Self> {
        let url = normalize_url(raw_url)?;
        Ok(Self {
            id: TaskId::from_normalized_url(&url),
            url,
            state: TaskState::Pending,
            source,
            assigned_node: None,
            assignment_id: None,
            assigned_at: None,
            deadline: None,
            attempts: 0,
            last_error: None,
            enqueued_at: now,
            timeout_override_seconds: None,
        })
    }

    pub fn with_timeout_override(mut self, seconds: u64) -> Self {
        self.timeout_override_seconds = Some(seconds);
        self
    }

    /// 当前是否由该节点的该次分配持有
    ///
    /// `assignment_id` 为 None 时只校验节点。
    pub fn is_owned_by(&self, node_id: &NodeId, assignment_id: Option<Uuid>) -> bool {
        if self.state != TaskState::Assigned || self.assigned_node.as_ref() != Some(node_id) {
            return false;
        }
        match assignment_id {
            Some(id) => self.assignment_id == Some(id),
            None => true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Assigned && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn clear_assignment(&mut self) {
        self.assigned_node = None;
        self.assignment_id = None;
        self.assigned_at = None;
        self.deadline = None;
    }
}

/// 工作节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task: Option<TaskId>,
    pub registered_at: DateTime<Utc>,
    /// 每次失效后重新注册加一
    pub lifetime: u32,
    pub stats: NodeStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "SUSPECTED")]
    Suspected,
    #[serde(rename = "FAILED")]
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Suspected => "SUSPECTED",
            NodeStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: NodeStatus::Active,
            last_heartbeat: now,
            current_task: None,
            registered_at: now,
            lifetime: 1,
            stats: NodeStats::default(),
        }
    }

    pub fn is_idle_active(&self) -> bool {
        self.status == NodeStatus::Active && self.current_task.is_none()
    }

    /// 距离最后一次心跳的时长, 时钟回拨时为零
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.last_heartbeat).max(chrono::Duration::zero())
    }
}
