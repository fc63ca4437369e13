use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crawler_core::CrawlerResult;
use crawler_domain::ObjectStore;
use tracing::debug;
use uuid::Uuid;

use super::validate_object_path;

/// 本地文件系统对象存储
///
/// 对象路径直接映射为 `root` 下的相对路径, 写入先落临时文件再 rename。
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    fn is_temp_file(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "tmp")
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> CrawlerResult<()> {
        validate_object_path(path)?;
        let target = self.full_path(path);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = target.with_file_name(format!("{file_name}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&temp_path, &body).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &target).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("本地写入成功: {}", target.display());
        Ok(())
    }

    async fn get_object(&self, path: &str) -> CrawlerResult<Option<Vec<u8>>> {
        validate_object_path(path)?;

        match tokio::fs::read(self.full_path(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_objects(&self, prefix: &str, limit: usize) -> CrawlerResult<Vec<String>> {
        validate_object_path(prefix)?;

        let start = self.full_path(prefix);
        let mut pending = vec![start];
        let mut found = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if !Self::is_temp_file(&path) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        found.push(key);
                    }
                }
            }
        }

        found.sort();
        found.truncate(limit);
        Ok(found)
    }
}
