use serde::{Deserialize, Serialize};

/// 内容存储配置
///
/// `mode = "tiered"` 时优先写入主对象存储, 失败后回退到本地目录;
/// `mode = "local"` 时只使用本地目录。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: String,
    pub fallback_dir: String,
    pub primary: Option<PrimaryStoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryStoreConfig {
    /// S3 兼容端点, 例如 `http://127.0.0.1:9000`
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: "local".to_string(),
            fallback_dir: "crawled_data".to_string(),
            primary: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fallback_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("本地回退目录不能为空"));
        }

        match self.mode.as_str() {
            "local" => {}
            "tiered" => {
                let primary = self
                    .primary
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("tiered 模式需要配置 storage.primary"))?;
                primary.validate()?;
            }
            other => {
                return Err(anyhow::anyhow!(
                    "无效的存储模式: {}，支持的模式: [\"tiered\", \"local\"]",
                    other
                ));
            }
        }

        Ok(())
    }
}

impl PrimaryStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(anyhow::anyhow!("主存储端点必须以http://或https://开头"));
        }

        if self.bucket.is_empty() {
            return Err(anyhow::anyhow!("存储桶名称不能为空"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("主存储请求超时必须大于0"));
        }

        Ok(())
    }
}
