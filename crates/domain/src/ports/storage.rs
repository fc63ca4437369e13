use async_trait::async_trait;
use crawler_core::CrawlerResult;

use crate::content::{ContentKey, ContentKind, ContentMetadata, ContentRecord, StorageTier};

/// 对象存储的最小接口, 主存储和本地回退各有一个实现
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// 写入对象, 同路径覆盖
    async fn put_object(&self, path: &str, body: Vec<u8>, content_type: &str)
        -> CrawlerResult<()>;

    /// 读取对象, 不存在时返回 None
    async fn get_object(&self, path: &str) -> CrawlerResult<Option<Vec<u8>>>;

    /// 列出前缀下的对象路径
    async fn list_objects(&self, prefix: &str, limit: usize) -> CrawlerResult<Vec<String>>;
}

/// 内容存储: 写入三个对象并报告实际使用的存储层
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(
        &self,
        key: &ContentKey,
        raw_payload: &str,
        processed_text: &str,
        metadata: &ContentMetadata,
    ) -> CrawlerResult<StorageTier>;

    async fn get(&self, key: &ContentKey) -> CrawlerResult<ContentRecord>;

    async fn list_keys(&self, kind: ContentKind, limit: usize) -> CrawlerResult<Vec<ContentKey>>;
}
