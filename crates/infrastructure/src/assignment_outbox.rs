use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crawler_core::CrawlerResult;
use crawler_domain::{AssignmentSink, NodeId, TaskAssignment};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// 内存任务分配信箱
///
/// 每个节点一个无界通道, 主节点投递分配, 工作节点通过轮询取走。
/// 投递永远不会阻塞调度循环。
#[derive(Debug, Default)]
pub struct InMemoryAssignmentOutbox {
    /// 节点ID -> 信箱
    mailboxes: RwLock<HashMap<NodeId, Arc<Mailbox>>>,
    delivered_total: AtomicU64,
    drained_total: AtomicU64,
}

#[derive(Debug)]
struct Mailbox {
    sender: mpsc::UnboundedSender<TaskAssignment>,
    receiver: Mutex<mpsc::UnboundedReceiver<TaskAssignment>>,
    /// 未取走的分配数
    size: AtomicUsize,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            size: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboxStats {
    pub mailboxes: usize,
    pub waiting: usize,
    pub delivered_total: u64,
    pub drained_total: u64,
}

impl InMemoryAssignmentOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mailbox(&self, node_id: &NodeId) -> Arc<Mailbox> {
        if let Some(mailbox) = self.mailboxes.read().await.get(node_id) {
            return mailbox.clone();
        }

        let mut mailboxes = self.mailboxes.write().await;
        mailboxes
            .entry(node_id.clone())
            .or_insert_with(|| {
                debug!("创建节点信箱: {}", node_id);
                Arc::new(Mailbox::new())
            })
            .clone()
    }

    /// 取走节点的所有待处理分配, 最多 `max` 条
    pub async fn drain(&self, node_id: &NodeId, max: usize) -> Vec<TaskAssignment> {
        let Some(mailbox) = self.mailboxes.read().await.get(node_id).cloned() else {
            return Vec::new();
        };

        let mut receiver = mailbox.receiver.lock().await;
        let mut drained = Vec::new();
        while drained.len() < max {
            match receiver.try_recv() {
                Ok(assignment) => {
                    mailbox.size.fetch_sub(1, Ordering::SeqCst);
                    drained.push(assignment);
                }
                Err(_) => break,
            }
        }

        self.drained_total
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// 丢弃节点尚未取走的分配, 节点重新注册时调用
    pub async fn purge(&self, node_id: &NodeId) -> usize {
        let purged = self.drain(node_id, usize::MAX).await.len();
        if purged > 0 {
            info!("丢弃节点 {} 的 {} 条过期分配", node_id, purged);
        }
        purged
    }

    pub async fn pending_for(&self, node_id: &NodeId) -> usize {
        self.mailboxes
            .read()
            .await
            .get(node_id)
            .map(|mailbox| mailbox.size.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> OutboxStats {
        let mailboxes = self.mailboxes.read().await;
        OutboxStats {
            mailboxes: mailboxes.len(),
            waiting: mailboxes
                .values()
                .map(|mailbox| mailbox.size.load(Ordering::SeqCst))
                .sum(),
            delivered_total: self.delivered_total.load(Ordering::Relaxed),
            drained_total: self.drained_total.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl AssignmentSink for InMemoryAssignmentOutbox {
    async fn deliver(&self, node_id: &NodeId, assignment: TaskAssignment) -> CrawlerResult<()> {
        let mailbox = self.mailbox(node_id).await;
        mailbox.size.fetch_add(1, Ordering::SeqCst);
        // 信箱持有接收端, 发送不会失败
        let _ = mailbox.sender.send(assignment);
        self.delivered_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crawler_domain::TaskId;
    use uuid::Uuid;

    fn assignment(url: &str) -> TaskAssignment {
        TaskAssignment {
            task_id: TaskId::from_normalized_url(url),
            assignment_id: Uuid::new_v4(),
            url: url.to_string(),
            attempt: 1,
            deadline: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_deliver_and_drain_in_order() {
        let outbox = InMemoryAssignmentOutbox::new();
        let node = NodeId::new("n1");

        outbox.deliver(&node, assignment("https://a.example/")).await.unwrap();
        outbox.deliver(&node, assignment("https://b.example/")).await.unwrap();
        assert_eq!(outbox.pending_for(&node).await, 2);

        let drained = outbox.drain(&node, 10).await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].url, "https://a.example/");
        assert_eq!(drained[1].url, "https://b.example/");
        assert_eq!(outbox.pending_for(&node).await, 0);
    }

    #[tokio::test]
    async fn test_mailboxes_are_isolated() {
        let outbox = InMemoryAssignmentOutbox::new();
        outbox
            .deliver(&NodeId::new("n1"), assignment("https://a.example/"))
            .await
            .unwrap();

        assert!(outbox.drain(&NodeId::new("n2"), 10).await.is_empty());
        assert_eq!(outbox.drain(&NodeId::new("n1"), 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let outbox = InMemoryAssignmentOutbox::new();
        let node = NodeId::new("n1");
        outbox.deliver(&node, assignment("https://a.example/")).await.unwrap();
        outbox.deliver(&node, assignment("https://b.example/")).await.unwrap();

        assert_eq!(outbox.drain(&node, 1).await.len(), 1);
        assert_eq!(outbox.purge(&node).await, 1);

        let stats = outbox.stats().await;
        assert_eq!(stats.mailboxes, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.delivered_total, 2);
        assert_eq!(stats.drained_total, 2);
    }
}
