//! 主节点与工作节点之间的消息

use chrono::{DateTime, Utc};
use crawler_core::{CrawlerError, CrawlerResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ContentMetadata;
use crate::value_objects::{NodeId, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failure,
}

/// 工作节点对一次分配的结果上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub node_id: NodeId,
    pub task_id: String,
    #[serde(default)]
    pub assignment_id: Option<Uuid>,
    pub status: ReportStatus,
    #[serde(default)]
    pub raw_payload: Option<String>,
    #[serde(default)]
    pub processed_text: Option<String>,
    #[serde(default)]
    pub metadata: Option<ContentMetadata>,
    #[serde(default)]
    pub error: Option<String>,
    /// 页面中提取出的链接, 主节点会将其加入队列
    #[serde(default)]
    pub discovered_urls: Vec<String>,
}

impl TaskReport {
    pub fn success(
        node_id: NodeId,
        task_id: &TaskId,
        assignment_id: Uuid,
        raw_payload: String,
        processed_text: String,
        metadata: ContentMetadata,
    ) -> Self {
        Self {
            node_id,
            task_id: task_id.to_string(),
            assignment_id: Some(assignment_id),
            status: ReportStatus::Success,
            raw_payload: Some(raw_payload),
            processed_text: Some(processed_text),
            metadata: Some(metadata),
            error: None,
            discovered_urls: Vec::new(),
        }
    }

    pub fn failure(
        node_id: NodeId,
        task_id: &TaskId,
        assignment_id: Uuid,
        error: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            task_id: task_id.to_string(),
            assignment_id: Some(assignment_id),
            status: ReportStatus::Failure,
            raw_payload: None,
            processed_text: None,
            metadata: None,
            error: Some(error.into()),
            discovered_urls: Vec::new(),
        }
    }

    pub fn with_discovered_urls(mut self, urls: Vec<String>) -> Self {
        self.discovered_urls = urls;
        self
    }

    /// 校验上报格式, 返回解析后的任务标识
    pub fn validate(&self) -> CrawlerResult<TaskId> {
        if self.node_id.is_empty() {
            return Err(CrawlerError::protocol("上报缺少 node_id"));
        }

        let task_id = TaskId::parse(&self.task_id)?;

        if self.status == ReportStatus::Success && self.raw_payload.is_none() {
            return Err(CrawlerError::protocol(format!(
                "成功上报缺少页面内容: {}",
                self.task_id
            )));
        }

        Ok(task_id)
    }
}

/// 主节点下发给工作节点的任务分配
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub assignment_id: Uuid,
    pub url: String,
    pub attempt: u32,
    pub deadline: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_id() -> TaskId {
        TaskId::from_normalized_url("https://example.com/")
    }

    #[test]
    fn test_valid_success_report() {
        let report = TaskReport::success(
            NodeId::new("n1"),
            &task_id(),
            Uuid::new_v4(),
            "<html></html>".to_string(),
            "".to_string(),
            ContentMetadata::minimal("https://example.com/", Utc::now()),
        );
        assert_eq!(report.validate().unwrap(), task_id());
    }

    #[test]
    fn test_success_without_payload_is_protocol_error() {
        let mut report = TaskReport::success(
            NodeId::new("n1"),
            &task_id(),
            Uuid::new_v4(),
            String::new(),
            String::new(),
            ContentMetadata::minimal("https://example.com/", Utc::now()),
        );
        report.raw_payload = None;
        assert!(matches!(report.validate(), Err(CrawlerError::Protocol(_))));
    }

    #[test]
    fn test_report_deserializes_with_defaults() {
        let json = format!(
            r#"{{"node_id":"n1","task_id":"{}","status":"failure","error":"dns"}}"#,
            task_id()
        );
        let report: TaskReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report.status, ReportStatus::Failure);
        assert!(report.discovered_urls.is_empty());
        assert!(report.assignment_id.is_none());
        assert!(report.validate().is_ok());
    }

    #[test]
    fn test_bad_task_id_rejected() {
        let mut report = TaskReport::failure(NodeId::new("n1"), &task_id(), Uuid::new_v4(), "x");
        report.task_id = "nope".to_string();
        assert!(matches!(report.validate(), Err(CrawlerError::Protocol(_))));
    }
}
