use async_trait::async_trait;
use crawler_core::CrawlerResult;

use crate::messaging::TaskAssignment;
use crate::value_objects::NodeId;

/// 任务分配的投递通道
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    async fn deliver(&self, node_id: &NodeId, assignment: TaskAssignment) -> CrawlerResult<()>;
}
