use std::fmt;

use crawler_core::{CrawlerError, CrawlerResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// 任务标识: 规范化URL的 SHA-256 十六进制摘要
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// 由已经规范化的URL计算任务标识
    pub fn from_normalized_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(hex::encode(digest))
    }

    /// 解析外部传入的标识, 只接受 64 位小写十六进制
    pub fn parse(raw: &str) -> CrawlerResult<Self> {
        let valid = raw.len() == 64
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(CrawlerError::protocol(format!("无效的任务标识: {raw}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 工作节点标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 规范化URL: 仅接受 http/https, 去掉片段, scheme 与 host 小写
pub fn normalize_url(raw: &str) -> CrawlerResult<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| CrawlerError::InvalidUrl(format!("{raw}: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(CrawlerError::InvalidUrl(format!(
            "{raw}: 不支持的协议 {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(CrawlerError::InvalidUrl(format!("{raw}: 缺少主机名")));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}
