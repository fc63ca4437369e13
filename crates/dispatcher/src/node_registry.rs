use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crawler_core::{CrawlerError, CrawlerResult};
use crawler_domain::{Node, NodeCounts, NodeId, NodeStatus, NodeSummary, TaskId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 心跳处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    /// 首次出现的节点
    Registered,
    Refreshed,
    /// Suspected 节点恢复为 Active
    Recovered,
}

/// 节点注册表
///
/// 节点永不删除; 状态只会 Active → Suspected → Failed 单向推进,
/// 唯一的例外是 Suspected 节点重新发来心跳, 以及 Failed 节点显式重新注册。
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 显式注册; Failed 节点由此开始新的生命周期
    ///
    /// 返回节点注册前持有的任务, 调用方需将其释放。
    pub fn register(&mut self, node_id: &NodeId, now: DateTime<Utc>) -> (u32, Option<TaskId>) {
        match self.nodes.get_mut(node_id) {
            None => {
                self.nodes.insert(node_id.clone(), Node::new(node_id.clone(), now));
                (1, None)
            }
            Some(node) => {
                if node.status == NodeStatus::Failed {
                    node.lifetime += 1;
                    node.registered_at = now;
                }
                node.status = NodeStatus::Active;
                node.last_heartbeat = node.last_heartbeat.max(now);
                (node.lifetime, node.current_task.take())
            }
        }
    }

    /// 处理心跳; 未知节点自动创建, Failed 节点被拒绝
    ///
    /// 心跳时间戳不会晚于 `now`, 也不会使最后心跳时间倒退。
    pub fn register_or_touch(
        &mut self,
        node_id: &NodeId,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CrawlerResult<HeartbeatOutcome> {
        let seen_at = timestamp.min(now);

        let Some(node) = self.nodes.get_mut(node_id) else {
            self.nodes
                .insert(node_id.clone(), Node::new(node_id.clone(), seen_at));
            return Ok(HeartbeatOutcome::Registered);
        };

        if node.status == NodeStatus::Failed {
            return Err(CrawlerError::NodeFailed {
                id: node_id.to_string(),
            });
        }

        if seen_at > node.last_heartbeat {
            node.last_heartbeat = seen_at;
        } else {
            debug!("忽略乱序心跳: {} ({} <= {})", node_id, seen_at, node.last_heartbeat);
        }

        if node.status == NodeStatus::Suspected {
            node.status = NodeStatus::Active;
            return Ok(HeartbeatOutcome::Recovered);
        }
        Ok(HeartbeatOutcome::Refreshed)
    }

    pub fn list_active(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.status == NodeStatus::Active)
            .map(|n| n.id.clone())
            .collect()
    }

    /// 可以接收新任务的节点: Active 且没有进行中的任务
    pub fn idle_active(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.is_idle_active()).collect()
    }

    /// Active → Suspected, 返回状态是否发生变化
    pub fn mark_suspected(&mut self, node_id: &NodeId) -> CrawlerResult<bool> {
        let node = self.get_mut(node_id)?;
        if node.status != NodeStatus::Active {
            return Ok(false);
        }
        node.status = NodeStatus::Suspected;
        Ok(true)
    }

    /// 标记为 Failed 并交出持有的任务; 已经 Failed 时返回 None
    pub fn mark_failed(&mut self, node_id: &NodeId) -> CrawlerResult<Option<Option<TaskId>>> {
        let node = self.get_mut(node_id)?;
        if node.status == NodeStatus::Failed {
            return Ok(None);
        }
        node.status = NodeStatus::Failed;
        Ok(Some(node.current_task.take()))
    }

    pub fn set_current_task(
        &mut self,
        node_id: &NodeId,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> CrawlerResult<()> {
        let node = self.get_mut(node_id)?;
        node.current_task = Some(task_id.clone());
        node.stats.last_assigned_at = Some(now);
        Ok(())
    }

    /// 清空节点的当前任务, 仅当其正是 `task_id` 时
    pub fn clear_current_task(&mut self, node_id: &NodeId, task_id: &TaskId) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) if node.current_task.as_ref() == Some(task_id) => {
                node.current_task = None;
                true
            }
            _ => false,
        }
    }

    pub fn record_completed(&mut self, node_id: &NodeId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.stats.tasks_completed += 1;
        }
    }

    pub fn record_failed(&mut self, node_id: &NodeId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.stats.tasks_failed += 1;
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    fn get_mut(&mut self, node_id: &NodeId) -> CrawlerResult<&mut Node> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| CrawlerError::node_not_found(node_id.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn counts(&self) -> NodeCounts {
        let mut counts = NodeCounts::default();
        for node in self.nodes.values() {
            match node.status {
                NodeStatus::Active => counts.active += 1,
                NodeStatus::Suspected => counts.suspected += 1,
                NodeStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .values()
            .map(|n| NodeSummary {
                node_id: n.id.clone(),
                status: n.status,
                current_task: n.current_task.clone(),
                last_heartbeat: n.last_heartbeat,
                lifetime: n.lifetime,
                stats: n.stats.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_heartbeat_creates_unknown_node() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        let n1 = NodeId::new("n1");

        assert_eq!(
            registry.register_or_touch(&n1, now, now).unwrap(),
            HeartbeatOutcome::Registered
        );
        assert_eq!(registry.list_active(), vec![n1.clone()]);
        assert_eq!(
            registry.register_or_touch(&n1, now, now).unwrap(),
            HeartbeatOutcome::Refreshed
        );
    }

    #[test]
    fn test_out_of_order_heartbeat_never_moves_backwards() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        let n1 = NodeId::new("n1");
        registry.register_or_touch(&n1, now, now).unwrap();

        let later = now + Duration::seconds(20);
        registry.register_or_touch(&n1, later, later).unwrap();
        registry
            .register_or_touch(&n1, now + Duration::seconds(5), later)
            .unwrap();
        assert_eq!(registry.get(&n1).unwrap().last_heartbeat, later);
    }

    #[test]
    fn test_future_timestamp_is_clamped() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        let n1 = NodeId::new("n1");
        registry
            .register_or_touch(&n1, now + Duration::hours(1), now)
            .unwrap();
        assert_eq!(registry.get(&n1).unwrap().last_heartbeat, now);
    }

    #[test]
    fn test_suspected_node_recovers_on_heartbeat() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        let n1 = NodeId::new("n1");
        registry.register_or_touch(&n1, now, now).unwrap();

        assert!(registry.mark_suspected(&n1).unwrap());
        assert!(!registry.mark_suspected(&n1).unwrap());
        assert!(registry.list_active().is_empty());

        assert_eq!(
            registry.register_or_touch(&n1, now, now).unwrap(),
            HeartbeatOutcome::Recovered
        );
        assert_eq!(registry.get(&n1).unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn test_failed_node_rejects_heartbeat_until_registered() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        let n1 = NodeId::new("n1");
        registry.register(&n1, now);
        let task = TaskId::from_normalized_url("https://example.com/");
        registry.set_current_task(&n1, &task, now).unwrap();

        assert_eq!(registry.mark_failed(&n1).unwrap(), Some(Some(task)));
        assert_eq!(registry.mark_failed(&n1).unwrap(), None);
        assert!(registry.get(&n1).unwrap().current_task.is_none());

        assert!(matches!(
            registry.register_or_touch(&n1, now, now),
            Err(CrawlerError::NodeFailed { .. })
        ));

        let (lifetime, released) = registry.register(&n1, now + Duration::seconds(1));
        assert_eq!(lifetime, 2);
        assert!(released.is_none());
        assert_eq!(registry.get(&n1).unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn test_idle_active_excludes_busy_and_suspected() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register(&NodeId::new(id), now);
        }
        let task = TaskId::from_normalized_url("https://example.com/");
        registry
            .set_current_task(&NodeId::new("a"), &task, now)
            .unwrap();
        registry.mark_suspected(&NodeId::new("b")).unwrap();

        let idle: Vec<_> = registry.idle_active().iter().map(|n| n.id.clone()).collect();
        assert_eq!(idle, vec![NodeId::new("c")]);

        assert!(!registry.clear_current_task(&NodeId::new("a"), &TaskId::from_normalized_url("https://other.example/")));
        assert!(registry.clear_current_task(&NodeId::new("a"), &task));
    }

    #[test]
    fn test_counts() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register(&NodeId::new(id), now);
        }
        registry.mark_suspected(&NodeId::new("b")).unwrap();
        registry.mark_failed(&NodeId::new("c")).unwrap();

        let counts = registry.counts();
        assert_eq!((counts.active, counts.suspected, counts.failed), (1, 1, 1));
    }
}
