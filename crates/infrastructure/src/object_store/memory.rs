use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use crawler_core::{CrawlerError, CrawlerResult};
use crawler_domain::ObjectStore;
use tokio::sync::RwLock;

use super::validate_object_path;

/// 内存对象存储, 可通过开关模拟写入或读取故障
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    name: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> CrawlerResult<()> {
        validate_object_path(path)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CrawlerError::storage(format!("{} 写入不可用: {path}", self.name)));
        }
        self.objects.write().await.insert(path.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, path: &str) -> CrawlerResult<Option<Vec<u8>>> {
        validate_object_path(path)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CrawlerError::storage(format!("{} 读取不可用: {path}", self.name)));
        }
        Ok(self.objects.read().await.get(path).cloned())
    }

    async fn list_objects(&self, prefix: &str, limit: usize) -> CrawlerResult<Vec<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CrawlerError::storage(format!("{} 列举不可用", self.name)));
        }
        let wanted = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|path| path.starts_with(&wanted))
            .take(limit)
            .cloned()
            .collect())
    }
}
