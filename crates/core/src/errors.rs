use thiserror::Error;

/// 爬虫主节点错误类型定义
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("任务状态无效: {id} 期望 {expected}, 实际 {actual}")]
    InvalidTaskState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("任务 {task_id} 当前不属于节点 {node_id}")]
    NotTaskOwner { task_id: String, node_id: String },

    #[error("节点已失效, 需要重新注册: {id}")]
    NodeFailed { id: String },

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("存储彻底失败: {key} (主存储: {primary}; 本地回退: {fallback})")]
    StorageFatal {
        key: String,
        primary: String,
        fallback: String,
    },

    #[error("内容未找到: {key}")]
    ContentNotFound { key: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("IO错误: {0}")]
    Io(String),

    #[error("资源不足: {0}")]
    ResourceExhausted(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误在故障处理上的归类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 节点失联或主动上报失败, 任务重新入队
    WorkerFailure,
    /// 重试次数耗尽
    TaskPermanentFailure,
    /// 主存储与本地回退均写入失败, 按节点失败处理
    StorageFatal,
    /// 消息格式错误, 丢弃并记录
    ProtocolError,
    /// 不属于上述任一类
    Other,
}

/// 统一的Result类型
pub type CrawlerResult<T> = std::result::Result<T, CrawlerError>;

impl CrawlerError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    pub fn invalid_state<S: Into<String>>(id: S, expected: &str, actual: &str) -> Self {
        Self::InvalidTaskState {
            id: id.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn not_owner<S: Into<String>, N: Into<String>>(task_id: S, node_id: N) -> Self {
        Self::NotTaskOwner {
            task_id: task_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn content_not_found<S: Into<String>>(key: S) -> Self {
        Self::ContentNotFound { key: key.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CrawlerError::NodeFailed { .. } | CrawlerError::Timeout(_) => {
                ErrorCategory::WorkerFailure
            }
            CrawlerError::StorageFatal { .. } => ErrorCategory::StorageFatal,
            CrawlerError::Protocol(_)
            | CrawlerError::InvalidUrl(_)
            | CrawlerError::Serialization(_) => ErrorCategory::ProtocolError,
            _ => ErrorCategory::Other,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlerError::Internal(_) | CrawlerError::Configuration(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlerError::Storage(_)
                | CrawlerError::StorageFatal { .. }
                | CrawlerError::Network(_)
                | CrawlerError::Io(_)
                | CrawlerError::Timeout(_)
                | CrawlerError::ResourceExhausted(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            CrawlerError::TaskNotFound { .. } => "请求的任务不存在",
            CrawlerError::NodeNotFound { .. } => "请求的节点不存在",
            CrawlerError::NodeFailed { .. } => "节点已被判定失效, 请重新注册",
            CrawlerError::InvalidUrl(_) => "URL格式有误",
            CrawlerError::Protocol(_) => "消息格式有误",
            CrawlerError::ContentNotFound { .. } => "请求的内容不存在",
            CrawlerError::ResourceExhausted(_) => "系统繁忙, 请稍后重试",
            CrawlerError::Timeout(_) => "操作超时, 请稍后重试",
            _ => "系统繁忙, 请稍后重试",
        }
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(err: serde_json::Error) -> Self {
        CrawlerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CrawlerError {
    fn from(err: std::io::Error) -> Self {
        CrawlerError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for CrawlerError {
    fn from(err: anyhow::Error) -> Self {
        CrawlerError::Internal(err.to_string())
    }
}
