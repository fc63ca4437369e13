//! 分层内容存储
//!
//! 每条内容记录由三个对象组成 (原始页面、处理后文本、元数据)。写入时先尝试主存储,
//! 任一对象写入失败即把整条记录写入本地回退层。元数据对象带有写入时间戳,
//! 读取时两层都查, 返回较新的一份; 主存储读取出错时只看回退层。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler_core::{CrawlerError, CrawlerResult, StorageConfig};
use crawler_domain::{
    ContentKey, ContentKind, ContentMetadata, ContentRecord, ContentStore, ObjectStore,
    StorageTier,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::object_store::{HttpObjectStore, LocalObjectStore};
use crate::observability::StructuredLogger;

pub struct TieredContentStore {
    primary: Arc<dyn ObjectStore>,
    fallback: Option<Arc<dyn ObjectStore>>,
}

struct Objects {
    raw: Vec<u8>,
    processed: Vec<u8>,
    metadata: Vec<u8>,
}

/// 元数据对象的存储格式: 页面元数据加上写入时间
#[derive(Serialize, Deserialize)]
struct StoredMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stored_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    metadata: ContentMetadata,
}

/// 从某一层读出的记录及其写入时间
struct Versioned {
    stored_at: Option<DateTime<Utc>>,
    record: ContentRecord,
}

impl TieredContentStore {
    pub fn new(primary: Arc<dyn ObjectStore>, fallback: Arc<dyn ObjectStore>) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }

    /// 只有一层存储, 写入失败直接视为致命
    pub fn single(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            primary: store,
            fallback: None,
        }
    }

    /// 按配置组装存储层: `tiered` 为 HTTP 主存储 + 本地回退, `local` 只使用本地目录
    pub fn from_config(config: &StorageConfig) -> CrawlerResult<Self> {
        let local: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.fallback_dir));

        match (config.mode.as_str(), &config.primary) {
            ("tiered", Some(primary)) => {
                info!(
                    "内容存储: 主存储 {}/{}, 本地回退 {}",
                    primary.endpoint, primary.bucket, config.fallback_dir
                );
                Ok(Self::new(Arc::new(HttpObjectStore::new(primary)?), local))
            }
            ("local", _) => {
                info!("内容存储: 仅本地目录 {}", config.fallback_dir);
                Ok(Self::single(local))
            }
            (mode, _) => Err(CrawlerError::config_error(format!(
                "无法按存储模式 {mode} 创建内容存储"
            ))),
        }
    }

    async fn write_all(
        store: &dyn ObjectStore,
        key: &ContentKey,
        objects: &Objects,
    ) -> CrawlerResult<()> {
        let parts = [
            (ContentKind::RawHtml, &objects.raw),
            (ContentKind::ProcessedText, &objects.processed),
            (ContentKind::Metadata, &objects.metadata),
        ];
        for (kind, body) in parts {
            store
                .put_object(&key.object_path(kind), body.clone(), kind.content_type())
                .await?;
        }
        Ok(())
    }

    async fn read_all(
        store: &dyn ObjectStore,
        key: &ContentKey,
        tier: StorageTier,
    ) -> CrawlerResult<Option<Versioned>> {
        let Some(raw) = store.get_object(&key.object_path(ContentKind::RawHtml)).await? else {
            return Ok(None);
        };
        let Some(metadata) = store.get_object(&key.object_path(ContentKind::Metadata)).await?
        else {
            return Ok(None);
        };
        let processed = store
            .get_object(&key.object_path(ContentKind::ProcessedText))
            .await?
            .unwrap_or_default();

        let stored: StoredMetadata = serde_json::from_slice(&metadata)?;
        Ok(Some(Versioned {
            stored_at: stored.stored_at,
            record: ContentRecord {
                key: key.clone(),
                raw_payload: String::from_utf8_lossy(&raw).into_owned(),
                processed_text: String::from_utf8_lossy(&processed).into_owned(),
                metadata: stored.metadata,
                tier,
            },
        }))
    }

    async fn list_tier(
        store: &dyn ObjectStore,
        kind: ContentKind,
        limit: usize,
    ) -> CrawlerResult<Vec<ContentKey>> {
        Ok(store
            .list_objects(kind.prefix(), limit)
            .await?
            .iter()
            .filter_map(|path| ContentKey::from_object_path(path, kind))
            .collect())
    }
}

#[async_trait]
impl ContentStore for TieredContentStore {
    async fn put(
        &self,
        key: &ContentKey,
        raw_payload: &str,
        processed_text: &str,
        metadata: &ContentMetadata,
    ) -> CrawlerResult<StorageTier> {
        let objects = Objects {
            raw: raw_payload.as_bytes().to_vec(),
            processed: processed_text.as_bytes().to_vec(),
            metadata: serde_json::to_vec_pretty(&StoredMetadata {
                stored_at: Some(Utc::now()),
                metadata: metadata.clone(),
            })?,
        };

        let primary_error = match Self::write_all(self.primary.as_ref(), key, &objects).await {
            Ok(()) => {
                debug!("内容已写入{}: {}", self.primary.name(), key);
                return Ok(StorageTier::Primary);
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(CrawlerError::StorageFatal {
                key: key.to_string(),
                primary: primary_error.to_string(),
                fallback: "未配置回退存储".to_string(),
            });
        };

        StructuredLogger::log_storage_degraded(key, &primary_error.to_string());

        match Self::write_all(fallback.as_ref(), key, &objects).await {
            Ok(()) => Ok(StorageTier::Fallback),
            Err(fallback_error) => Err(CrawlerError::StorageFatal {
                key: key.to_string(),
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
        }
    }

    async fn get(&self, key: &ContentKey) -> CrawlerResult<ContentRecord> {
        let primary = match Self::read_all(self.primary.as_ref(), key, StorageTier::Primary).await
        {
            Ok(found) => found,
            Err(e) => {
                warn!("主存储读取失败, 尝试回退存储: {} - {}", key, e);
                None
            }
        };

        let fallback = match &self.fallback {
            Some(fallback) => {
                match Self::read_all(fallback.as_ref(), key, StorageTier::Fallback).await {
                    Ok(found) => found,
                    Err(e) if primary.is_some() => {
                        warn!("回退存储读取失败, 使用主存储记录: {} - {}", key, e);
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        // 主存储不可用期间的重写落在回退层, 比主存储里的旧版本更新
        match (primary, fallback) {
            (Some(primary), Some(fallback)) if fallback.stored_at > primary.stored_at => {
                Ok(fallback.record)
            }
            (Some(found), _) | (None, Some(found)) => Ok(found.record),
            (None, None) => Err(CrawlerError::content_not_found(key.to_string())),
        }
    }

    async fn list_keys(&self, kind: ContentKind, limit: usize) -> CrawlerResult<Vec<ContentKey>> {
        let mut keys = BTreeSet::new();
        let mut primary_listed = false;

        match Self::list_tier(self.primary.as_ref(), kind, limit).await {
            Ok(found) => {
                primary_listed = true;
                keys.extend(found.into_iter().map(|k| (k.date, k.hash)));
            }
            Err(e) => debug!("{} 无法列举, 使用回退存储: {}", self.primary.name(), e),
        }

        if let Some(fallback) = &self.fallback {
            match Self::list_tier(fallback.as_ref(), kind, limit).await {
                Ok(found) => keys.extend(found.into_iter().map(|k| (k.date, k.hash))),
                Err(e) if primary_listed => warn!("回退存储列举失败: {}", e),
                Err(e) => return Err(e),
            }
        } else if !primary_listed {
            return Err(CrawlerError::storage(format!(
                "{} 不支持列举",
                self.primary.name()
            )));
        }

        Ok(keys
            .into_iter()
            .take(limit)
            .map(|(date, hash)| ContentKey { hash, date })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use chrono::{TimeZone, Utc};
    use crawler_domain::TaskId;
    use mockall::mock;

    mock! {
        pub Primary {}

        #[async_trait]
        impl ObjectStore for Primary {
            fn name(&self) -> &str;
            async fn put_object(&self, path: &str, body: Vec<u8>, content_type: &str) -> CrawlerResult<()>;
            async fn get_object(&self, path: &str) -> CrawlerResult<Option<Vec<u8>>>;
            async fn list_objects(&self, prefix: &str, limit: usize) -> CrawlerResult<Vec<String>>;
        }
    }

    fn sample(url: &str) -> (ContentKey, ContentMetadata) {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let key = ContentKey::new(&TaskId::from_normalized_url(url), at);
        let mut metadata = ContentMetadata::minimal(url, at);
        metadata.title = Some("Example".to_string());
        metadata.keywords = vec!["example".to_string()];
        (key, metadata)
    }

    #[tokio::test]
    async fn test_primary_roundtrip() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let fallback = Arc::new(InMemoryObjectStore::new("local"));
        let store = TieredContentStore::new(primary.clone(), fallback.clone());
        let (key, metadata) = sample("https://example.com/");

        let tier = store.put(&key, "<html>hi</html>", "hi", &metadata).await.unwrap();
        assert_eq!(tier, StorageTier::Primary);
        assert_eq!(primary.len().await, 3);
        assert_eq!(fallback.len().await, 0);

        let record = store.get(&key).await.unwrap();
        assert_eq!(record.raw_payload, "<html>hi</html>");
        assert_eq!(record.processed_text, "hi");
        assert_eq!(record.metadata, metadata);
        assert_eq!(record.tier, StorageTier::Primary);
    }

    #[tokio::test]
    async fn test_forced_primary_failure_lands_in_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut primary = MockPrimary::new();
        primary
            .expect_put_object()
            .returning(|path, _, _| Err(CrawlerError::storage(format!("503 for {path}"))));
        primary
            .expect_get_object()
            .returning(|_| Err(CrawlerError::Network("connection refused".to_string())));

        let fallback = Arc::new(LocalObjectStore::new(dir.path()));
        let store = TieredContentStore::new(Arc::new(primary), fallback);
        let (key, metadata) = sample("https://example.com/degraded");

        let tier = store.put(&key, "<p>x</p>", "x", &metadata).await.unwrap();
        assert_eq!(tier, StorageTier::Fallback);

        for kind in ContentKind::ALL {
            assert!(dir.path().join(key.object_path(kind)).exists());
        }

        let record = store.get(&key).await.unwrap();
        assert_eq!(record.tier, StorageTier::Fallback);
        assert_eq!(record.raw_payload, "<p>x</p>");
        assert_eq!(record.metadata.title.as_deref(), Some("Example"));
    }

    #[tokio::test]
    async fn test_partial_primary_write_rewrites_whole_record_in_fallback() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let fallback = Arc::new(InMemoryObjectStore::new("local"));
        let store = TieredContentStore::new(primary.clone(), fallback.clone());
        let (key, metadata) = sample("https://example.com/partial");

        primary.set_fail_writes(true);
        let tier = store.put(&key, "raw", "text", &metadata).await.unwrap();
        assert_eq!(tier, StorageTier::Fallback);
        assert_eq!(fallback.len().await, 3);
    }

    #[tokio::test]
    async fn test_both_tiers_failing_is_fatal() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let fallback = Arc::new(InMemoryObjectStore::new("local"));
        primary.set_fail_writes(true);
        fallback.set_fail_writes(true);
        let store = TieredContentStore::new(primary, fallback);
        let (key, metadata) = sample("https://example.com/fatal");

        let err = store.put(&key, "raw", "text", &metadata).await.unwrap_err();
        assert!(matches!(err, CrawlerError::StorageFatal { .. }));
    }

    #[tokio::test]
    async fn test_single_tier_failure_is_fatal() {
        let only = Arc::new(InMemoryObjectStore::new("local"));
        only.set_fail_writes(true);
        let store = TieredContentStore::single(only);
        let (key, metadata) = sample("https://example.com/single");

        let err = store.put(&key, "raw", "text", &metadata).await.unwrap_err();
        assert!(matches!(err, CrawlerError::StorageFatal { .. }));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let store = TieredContentStore::new(
            Arc::new(InMemoryObjectStore::new("primary")),
            Arc::new(InMemoryObjectStore::new("local")),
        );
        let (key, _) = sample("https://example.com/none");
        assert!(matches!(
            store.get(&key).await,
            Err(CrawlerError::ContentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let store = TieredContentStore::new(
            primary.clone(),
            Arc::new(InMemoryObjectStore::new("local")),
        );
        let (key, metadata) = sample("https://example.com/again");

        store.put(&key, "v1", "t1", &metadata).await.unwrap();
        store.put(&key, "v2", "t2", &metadata).await.unwrap();
        assert_eq!(primary.len().await, 3);
        assert_eq!(store.get(&key).await.unwrap().raw_payload, "v2");
    }

    #[tokio::test]
    async fn test_get_returns_newest_version_across_tiers() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let fallback = Arc::new(InMemoryObjectStore::new("local"));
        let store = TieredContentStore::new(primary.clone(), fallback.clone());
        let (key, metadata) = sample("https://example.com/outage");
        let pause = std::time::Duration::from_millis(2);

        assert_eq!(
            store.put(&key, "v1", "t1", &metadata).await.unwrap(),
            StorageTier::Primary
        );

        // 主存储故障期间的重写
        primary.set_fail_writes(true);
        tokio::time::sleep(pause).await;
        assert_eq!(
            store.put(&key, "v2", "t2", &metadata).await.unwrap(),
            StorageTier::Fallback
        );

        let record = store.get(&key).await.unwrap();
        assert_eq!(record.raw_payload, "v2");
        assert_eq!(record.processed_text, "t2");
        assert_eq!(record.tier, StorageTier::Fallback);
        assert_eq!(record.metadata, metadata);

        // 主存储恢复后的重写又成为最新版本
        primary.set_fail_writes(false);
        tokio::time::sleep(pause).await;
        store.put(&key, "v3", "t3", &metadata).await.unwrap();

        let record = store.get(&key).await.unwrap();
        assert_eq!(record.raw_payload, "v3");
        assert_eq!(record.tier, StorageTier::Primary);
    }

    #[tokio::test]
    async fn test_metadata_without_write_stamp_is_readable() {
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let store = TieredContentStore::single(primary.clone());
        let (key, metadata) = sample("https://example.com/legacy");

        primary
            .put_object(&key.object_path(ContentKind::RawHtml), b"old".to_vec(), "text/html")
            .await
            .unwrap();
        primary
            .put_object(
                &key.object_path(ContentKind::Metadata),
                serde_json::to_vec(&metadata).unwrap(),
                "application/json",
            )
            .await
            .unwrap();

        let record = store.get(&key).await.unwrap();
        assert_eq!(record.raw_payload, "old");
        assert_eq!(record.processed_text, "");
        assert_eq!(record.metadata, metadata);
    }

    #[tokio::test]
    async fn test_list_keys_merges_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(InMemoryObjectStore::new("primary"));
        let store =
            TieredContentStore::new(primary.clone(), Arc::new(LocalObjectStore::new(dir.path())));

        let (k1, m1) = sample("https://example.com/1");
        let (k2, m2) = sample("https://example.com/2");
        store.put(&k1, "a", "a", &m1).await.unwrap();
        primary.set_fail_writes(true);
        store.put(&k2, "b", "b", &m2).await.unwrap();

        let keys = store.list_keys(ContentKind::Metadata, 10).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&k1));
        assert!(keys.contains(&k2));
    }

    #[test]
    fn test_from_config_modes() {
        let mut config = StorageConfig::default();
        assert!(TieredContentStore::from_config(&config).is_ok());

        config.mode = "tiered".to_string();
        config.primary = Some(crawler_core::PrimaryStoreConfig {
            endpoint: "http://127.0.0.1:9000".to_string(),
            bucket: "crawl".to_string(),
            access_token: None,
            request_timeout_seconds: 2,
        });
        let store = TieredContentStore::from_config(&config).unwrap();
        assert!(store.fallback.is_some());

        config.mode = "s3".to_string();
        assert!(TieredContentStore::from_config(&config).is_err());
    }
}
