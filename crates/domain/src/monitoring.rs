use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{NodeStats, NodeStatus, TaskState};
use crate::value_objects::{NodeId, TaskId};

/// 监控快照, 每个调度周期发布一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub generated_at: DateTime<Utc>,
    pub tasks: TaskCounts,
    pub nodes: NodeCounts,
    pub recent_transitions: Vec<TaskTransition>,
    pub node_stats: Vec<NodeSummary>,
    pub storage: StorageStats,
    pub discarded_reports: u64,
    pub inflight_writes: usize,
}

impl MonitoringSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            tasks: TaskCounts::default(),
            nodes: NodeCounts::default(),
            recent_transitions: Vec::new(),
            node_stats: Vec::new(),
            storage: StorageStats::default(),
            discarded_reports: 0,
            inflight_writes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub assigned: usize,
    pub completed: usize,
    pub dead: usize,
}

impl TaskCounts {
    /// 没有等待或执行中的任务
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.assigned == 0
    }

    pub fn total(&self) -> usize {
        self.pending + self.assigned + self.completed + self.dead
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeCounts {
    pub active: usize,
    pub suspected: usize,
    pub failed: usize,
}

/// 任务状态迁移记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub url: String,
    pub from: Option<TaskState>,
    pub to: TaskState,
    pub node_id: Option<NodeId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub current_task: Option<TaskId>,
    pub last_heartbeat: DateTime<Utc>,
    pub lifetime: u32,
    pub stats: NodeStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageStats {
    pub primary_writes: u64,
    pub fallback_writes: u64,
    pub failed_writes: u64,
}
