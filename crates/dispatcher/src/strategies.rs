use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crawler_core::{CrawlerError, CrawlerResult};
use crawler_domain::{Node, NodeId, Task};
use tracing::debug;

/// 节点选择策略
///
/// 在持有集群状态锁时调用, 因此是同步接口。候选节点均为空闲的 Active 节点。
pub trait NodeSelectionStrategy: Send + Sync {
    fn select_node(&self, task: &Task, candidates: &[&Node]) -> Option<NodeId>;

    fn name(&self) -> &str;
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

/// 选择最久未被分配任务的节点, 从未分配过的节点优先
pub struct LeastRecentlyAssignedStrategy;

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for RoundRobinStrategy {
    fn select_node(&self, task: &Task, candidates: &[&Node]) -> Option<NodeId> {
        if candidates.is_empty() {
            debug!("没有可用的节点");
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = candidates[index];

        debug!(
            "轮询策略为任务 {} 选择节点: {} (索引: {}/{})",
            task.id,
            selected.id,
            index,
            candidates.len()
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

impl LeastRecentlyAssignedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastRecentlyAssignedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for LeastRecentlyAssignedStrategy {
    fn select_node(&self, task: &Task, candidates: &[&Node]) -> Option<NodeId> {
        // Option 的排序中 None 最小
        let selected = candidates
            .iter()
            .min_by_key(|node| (node.stats.last_assigned_at, node.id.clone()))?;

        debug!(
            "最久未分配策略为任务 {} 选择节点: {} (上次分配: {:?})",
            task.id, selected.id, selected.stats.last_assigned_at
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        "LeastRecentlyAssigned"
    }
}

/// 按配置名创建策略
pub fn strategy_from_name(name: &str) -> CrawlerResult<Arc<dyn NodeSelectionStrategy>> {
    match name {
        "round_robin" => Ok(Arc::new(RoundRobinStrategy::new())),
        "least_recently_assigned" => Ok(Arc::new(LeastRecentlyAssignedStrategy::new())),
        other => Err(CrawlerError::config_error(format!("未知的分发策略: {other}"))),
    }
}
