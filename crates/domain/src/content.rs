use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::TaskId;

/// 一条内容记录包含的三类对象
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    RawHtml,
    ProcessedText,
    Metadata,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [
        ContentKind::RawHtml,
        ContentKind::ProcessedText,
        ContentKind::Metadata,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            ContentKind::RawHtml => "rawHtml",
            ContentKind::ProcessedText => "processedText",
            ContentKind::Metadata => "metadata",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentKind::RawHtml => "html",
            ContentKind::ProcessedText => "txt",
            ContentKind::Metadata => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContentKind::RawHtml => "text/html; charset=utf-8",
            ContentKind::ProcessedText => "text/plain; charset=utf-8",
            ContentKind::Metadata => "application/json",
        }
    }
}

/// 内容键: URL 摘要 + UTC 日期分区
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub hash: String,
    pub date: NaiveDate,
}

impl ContentKey {
    /// `written_at` 为写入时间 (UTC), 决定日期分区
    pub fn new(task_id: &TaskId, written_at: DateTime<Utc>) -> Self {
        Self {
            hash: task_id.as_str().to_string(),
            date: written_at.date_naive(),
        }
    }

    /// `{prefix}/{yyyy}/{mm}/{dd}/{hash}.{ext}`
    pub fn object_path(&self, kind: ContentKind) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}.{}",
            kind.prefix(),
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hash,
            kind.extension()
        )
    }

    /// 从对象路径还原内容键, 路径不符合布局时返回 None
    pub fn from_object_path(path: &str, kind: ContentKind) -> Option<Self> {
        let rest = path.strip_prefix(kind.prefix())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 4 {
            return None;
        }
        let year = parts[0].parse().ok()?;
        let month = parts[1].parse().ok()?;
        let day = parts[2].parse().ok()?;
        let hash = parts[3].strip_suffix(&format!(".{}", kind.extension()))?;
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            hash: hash.to_string(),
            date: NaiveDate::from_ymd_opt(year, month, day)?,
        })
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date.format("%Y/%m/%d"), self.hash)
    }
}

/// 页面元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentMetadata {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub crawled_at: DateTime<Utc>,
    #[serde(default)]
    pub links_found: usize,
    #[serde(default)]
    pub text_length: usize,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentMetadata {
    pub fn minimal(url: &str, crawled_at: DateTime<Utc>) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            keywords: Vec::new(),
            summary: None,
            crawled_at,
            links_found: 0,
            text_length: 0,
            extra: serde_json::Map::new(),
        }
    }
}

/// 内容写入到的存储层
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub key: ContentKey,
    pub raw_payload: String,
    pub processed_text: String,
    pub metadata: ContentMetadata,
    pub tier: StorageTier,
}
