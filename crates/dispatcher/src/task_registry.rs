use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use crawler_core::{CrawlerError, CrawlerResult};
use crawler_domain::{
    normalize_url, NodeId, Task, TaskAssignment, TaskCounts, TaskId, TaskSource, TaskState,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// 任务重新入队的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeueOutcome {
    pub task_id: TaskId,
    pub url: String,
    pub attempts: u32,
    /// 尝试次数耗尽, 任务进入 Dead
    pub dead: bool,
}

/// 重新爬取请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecrawlOutcome {
    /// 之前未见过, 作为新任务入队
    Enqueued,
    /// 已完成或已死亡的任务重新进入队列
    Reset,
    /// 任务仍在队列中或执行中, 无需处理
    AlreadyActive,
}

/// 任务注册表
///
/// 维护所有任务及其 FIFO 等待队列。本身不加锁, 由 `ClusterState` 统一串行化访问。
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    /// 等待分配的任务ID, 出队时跳过已不处于 Pending 的条目
    queue: VecDeque<TaskId>,
    max_attempts: u32,
    default_timeout: Duration,
}

impl TaskRegistry {
    pub fn new(max_attempts: u32, default_timeout: std::time::Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            max_attempts: max_attempts.max(1),
            default_timeout: Duration::from_std(default_timeout)
                .unwrap_or_else(|_| Duration::seconds(120)),
        }
    }

    /// 加入新任务, 已存在时返回 false
    pub fn enqueue(&mut self, task: Task) -> bool {
        if self.tasks.contains_key(&task.id) {
            debug!("任务已存在, 忽略: {}", task.url);
            return false;
        }

        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        self.queue.push_back(id);
        true
    }

    /// 取出下一个等待中的任务; 没有可用节点时不出队
    pub fn dequeue_next(&mut self, eligible_nodes: &[NodeId]) -> Option<TaskId> {
        if eligible_nodes.is_empty() {
            return None;
        }

        while let Some(id) = self.queue.pop_front() {
            if self.tasks.get(&id).map(|t| t.state) == Some(TaskState::Pending) {
                return Some(id);
            }
        }
        None
    }

    /// 把刚出队但未能分配的任务放回队首
    pub fn restore_front(&mut self, id: TaskId) {
        self.queue.push_front(id);
    }

    pub fn mark_assigned(
        &mut self,
        id: &TaskId,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> CrawlerResult<TaskAssignment> {
        let default_timeout = self.default_timeout;
        let task = self.get_mut(id)?;

        if task.state != TaskState::Pending {
            return Err(CrawlerError::invalid_state(
                id.as_str(),
                TaskState::Pending.as_str(),
                task.state.as_str(),
            ));
        }

        let timeout = task
            .timeout_override_seconds
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(default_timeout);
        let assignment_id = Uuid::new_v4();
        let deadline = now + timeout;

        task.state = TaskState::Assigned;
        task.assigned_node = Some(node_id.clone());
        task.assignment_id = Some(assignment_id);
        task.assigned_at = Some(now);
        task.deadline = Some(deadline);

        Ok(TaskAssignment {
            task_id: id.clone(),
            assignment_id,
            url: task.url.clone(),
            attempt: task.attempts + 1,
            deadline,
        })
    }

    /// 校验任务当前归属于该节点 (及该次分配)
    pub fn verify_owner(
        &self,
        id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
    ) -> CrawlerResult<&Task> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| CrawlerError::task_not_found(id.as_str()))?;

        if !task.is_owned_by(node_id, assignment_id) {
            return Err(CrawlerError::not_owner(id.as_str(), node_id.as_str()));
        }
        Ok(task)
    }

    pub fn mark_completed(
        &mut self,
        id: &TaskId,
        node_id: &NodeId,
        assignment_id: Option<Uuid>,
    ) -> CrawlerResult<&Task> {
        self.verify_owner(id, node_id, assignment_id)?;
        let task = self.get_mut(id)?;
        task.state = TaskState::Completed;
        task.last_error = None;
        task.clear_assignment();
        Ok(task)
    }

    /// 延长执行期限, 收到成功上报后给内容写入留出时间
    pub fn extend_deadline(&mut self, id: &TaskId, now: DateTime<Utc>) -> CrawlerResult<()> {
        let default_timeout = self.default_timeout;
        let task = self.get_mut(id)?;
        let timeout = task
            .timeout_override_seconds
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(default_timeout);
        task.deadline = Some(now + timeout);
        Ok(())
    }

    /// Assigned → Pending (或 Dead), 尝试次数加一
    pub fn requeue(&mut self, id: &TaskId, reason: &str) -> CrawlerResult<RequeueOutcome> {
        let max_attempts = self.max_attempts;
        let task = self.get_mut(id)?;

        if task.state != TaskState::Assigned {
            return Err(CrawlerError::invalid_state(
                id.as_str(),
                TaskState::Assigned.as_str(),
                task.state.as_str(),
            ));
        }

        task.attempts += 1;
        task.last_error = Some(reason.to_string());
        task.clear_assignment();

        let dead = task.attempts >= max_attempts;
        task.state = if dead {
            TaskState::Dead
        } else {
            TaskState::Pending
        };

        let outcome = RequeueOutcome {
            task_id: id.clone(),
            url: task.url.clone(),
            attempts: task.attempts,
            dead,
        };

        if !dead {
            self.queue.push_back(id.clone());
        }
        Ok(outcome)
    }

    /// 已过期限的分配, 按期限先后排序
    pub fn expired_assignments(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut expired: Vec<&Task> = self.tasks.values().filter(|t| t.is_expired(now)).collect();
        expired.sort_by_key(|t| (t.deadline, t.enqueued_at));
        expired.into_iter().map(|t| t.id.clone()).collect()
    }

    pub fn recrawl(
        &mut self,
        raw_url: &str,
        now: DateTime<Utc>,
    ) -> CrawlerResult<(TaskId, RecrawlOutcome)> {
        let url = normalize_url(raw_url)?;
        let id = TaskId::from_normalized_url(&url);

        if !self.tasks.contains_key(&id) {
            self.enqueue(Task::new(&url, TaskSource::Recrawl, now)?);
            return Ok((id, RecrawlOutcome::Enqueued));
        }

        let task = self.get_mut(&id)?;
        if !task.state.is_terminal() {
            return Ok((id, RecrawlOutcome::AlreadyActive));
        }

        task.state = TaskState::Pending;
        task.source = TaskSource::Recrawl;
        task.attempts = 0;
        task.last_error = None;
        task.enqueued_at = now;
        task.clear_assignment();
        self.queue.push_back(id.clone());
        Ok((id, RecrawlOutcome::Reset))
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    fn get_mut(&mut self, id: &TaskId) -> CrawlerResult<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| CrawlerError::task_not_found(id.as_str()))
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.values() {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Assigned => counts.assigned += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Dead => counts.dead += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(3, std::time::Duration::from_secs(120))
    }

    fn task(url: &str, now: DateTime<Utc>) -> Task {
        Task::new(url, TaskSource::Seed, now).unwrap()
    }

    fn nodes() -> Vec<NodeId> {
        vec![NodeId::new("n1")]
    }

    #[test]
    fn test_enqueue_is_deduplicated() {
        let now = Utc::now();
        let mut registry = registry();
        assert!(registry.enqueue(task("https://example.com/a", now)));
        assert!(!registry.enqueue(task("https://example.com/a#frag", now)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dequeue_is_fifo_and_requires_nodes() {
        let now = Utc::now();
        let mut registry = registry();
        let first = task("https://example.com/1", now);
        let second = task("https://example.com/2", now);
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        registry.enqueue(first);
        registry.enqueue(second);

        assert_eq!(registry.dequeue_next(&[]), None);
        assert_eq!(registry.dequeue_next(&nodes()), Some(first_id));
        assert_eq!(registry.dequeue_next(&nodes()), Some(second_id));
        assert_eq!(registry.dequeue_next(&nodes()), None);
    }

    #[test]
    fn test_mark_assigned_requires_pending() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/", now);
        let id = t.id.clone();
        registry.enqueue(t);

        let assignment = registry.mark_assigned(&id, &NodeId::new("n1"), now).unwrap();
        assert_eq!(assignment.attempt, 1);
        assert_eq!(assignment.deadline, now + Duration::seconds(120));

        let err = registry.mark_assigned(&id, &NodeId::new("n2"), now).unwrap_err();
        assert!(matches!(err, CrawlerError::InvalidTaskState { .. }));
    }

    #[test]
    fn test_timeout_override_sets_deadline() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/slow", now).with_timeout_override(600);
        let id = t.id.clone();
        registry.enqueue(t);

        let assignment = registry.mark_assigned(&id, &NodeId::new("n1"), now).unwrap();
        assert_eq!(assignment.deadline, now + Duration::seconds(600));
    }

    #[test]
    fn test_mark_completed_checks_owner_and_lease() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/", now);
        let id = t.id.clone();
        registry.enqueue(t);
        let n1 = NodeId::new("n1");
        let assignment = registry.mark_assigned(&id, &n1, now).unwrap();

        assert!(matches!(
            registry.mark_completed(&id, &NodeId::new("n2"), None),
            Err(CrawlerError::NotTaskOwner { .. })
        ));
        assert!(registry
            .mark_completed(&id, &n1, Some(Uuid::new_v4()))
            .is_err());

        let done = registry
            .mark_completed(&id, &n1, Some(assignment.assignment_id))
            .unwrap();
        assert_eq!(done.state, TaskState::Completed);
        assert!(done.assigned_node.is_none());
    }

    #[test]
    fn test_third_failure_makes_task_dead() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/flaky", now);
        let id = t.id.clone();
        registry.enqueue(t);
        let n1 = NodeId::new("n1");

        for expected_attempts in 1..=2 {
            assert_eq!(registry.dequeue_next(&nodes()), Some(id.clone()));
            registry.mark_assigned(&id, &n1, now).unwrap();
            let outcome = registry.requeue(&id, "worker_failure").unwrap();
            assert_eq!(outcome.attempts, expected_attempts);
            assert!(!outcome.dead);
            assert_eq!(registry.get(&id).unwrap().state, TaskState::Pending);
        }

        assert_eq!(registry.dequeue_next(&nodes()), Some(id.clone()));
        registry.mark_assigned(&id, &n1, now).unwrap();
        let outcome = registry.requeue(&id, "worker_failure").unwrap();
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.dead);
        assert_eq!(registry.get(&id).unwrap().state, TaskState::Dead);
        assert_eq!(registry.dequeue_next(&nodes()), None);
    }

    #[test]
    fn test_requeued_task_rejoins_at_back() {
        let now = Utc::now();
        let mut registry = registry();
        let a = task("https://example.com/a", now);
        let b = task("https://example.com/b", now);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        registry.enqueue(a);
        registry.enqueue(b);

        let first = registry.dequeue_next(&nodes()).unwrap();
        assert_eq!(first, a_id);
        registry.mark_assigned(&a_id, &NodeId::new("n1"), now).unwrap();
        registry.requeue(&a_id, "timeout").unwrap();

        assert_eq!(registry.dequeue_next(&nodes()), Some(b_id));
        assert_eq!(registry.dequeue_next(&nodes()), Some(a_id));
    }

    #[test]
    fn test_requeue_requires_assigned() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/", now);
        let id = t.id.clone();
        registry.enqueue(t);
        assert!(registry.requeue(&id, "timeout").is_err());
    }

    #[test]
    fn test_expired_assignments() {
        let now = Utc::now();
        let mut registry = registry();
        let t = task("https://example.com/", now);
        let id = t.id.clone();
        registry.enqueue(t);
        registry.mark_assigned(&id, &NodeId::new("n1"), now).unwrap();

        assert!(registry.expired_assignments(now + Duration::seconds(119)).is_empty());
        assert_eq!(
            registry.expired_assignments(now + Duration::seconds(125)),
            vec![id]
        );
    }

    #[test]
    fn test_recrawl_resets_terminal_tasks() {
        let now = Utc::now();
        let mut registry = registry();
        let (id, outcome) = registry.recrawl("https://example.com/r", now).unwrap();
        assert_eq!(outcome, RecrawlOutcome::Enqueued);

        let (_, outcome) = registry.recrawl("https://example.com/r", now).unwrap();
        assert_eq!(outcome, RecrawlOutcome::AlreadyActive);

        registry.dequeue_next(&nodes());
        let n1 = NodeId::new("n1");
        registry.mark_assigned(&id, &n1, now).unwrap();
        registry.mark_completed(&id, &n1, None).unwrap();

        let (_, outcome) = registry.recrawl("https://example.com/r", now).unwrap();
        assert_eq!(outcome, RecrawlOutcome::Reset);
        let task = registry.get(&id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(registry.dequeue_next(&nodes()), Some(id));
    }

    #[test]
    fn test_counts() {
        let now = Utc::now();
        let mut registry = registry();
        let a = task("https://example.com/a", now);
        let a_id = a.id.clone();
        registry.enqueue(a);
        registry.enqueue(task("https://example.com/b", now));
        registry.mark_assigned(&a_id, &NodeId::new("n1"), now).unwrap();

        let counts = registry.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.assigned, 1);
        assert_eq!(counts.total(), 2);
    }
}
