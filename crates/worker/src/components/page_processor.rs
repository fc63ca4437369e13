use async_trait::async_trait;
use chrono::Utc;
use crawler_core::CrawlerResult;
use crawler_domain::{ContentMetadata, NodeId, TaskAssignment, TaskReport};

/// 页面处理的产出
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    pub raw_payload: String,
    pub processed_text: String,
    pub metadata: ContentMetadata,
    pub discovered_urls: Vec<String>,
}

impl CrawlOutput {
    /// 只有原始内容时使用, 其余字段取默认值
    pub fn raw(url: &str, raw_payload: impl Into<String>) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            processed_text: String::new(),
            metadata: ContentMetadata::minimal(url, Utc::now()),
            discovered_urls: Vec::new(),
        }
    }

    pub fn into_report(self, node_id: NodeId, assignment: &TaskAssignment) -> TaskReport {
        TaskReport::success(
            node_id,
            &assignment.task_id,
            assignment.assignment_id,
            self.raw_payload,
            self.processed_text,
            self.metadata,
        )
        .with_discovered_urls(self.discovered_urls)
    }
}

/// 抓取并解析一个页面
///
/// 抓取与解析逻辑由部署方提供, 本 crate 只负责与主节点的协议交互。
#[async_trait]
pub trait PageProcessor: Send + Sync {
    async fn process(&self, assignment: &TaskAssignment) -> CrawlerResult<CrawlOutput>;
}
