use std::time::Duration;

use async_trait::async_trait;
use crawler_core::{CrawlerError, CrawlerResult, PrimaryStoreConfig};
use crawler_domain::ObjectStore;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::validate_object_path;

/// S3 兼容的对象存储客户端
///
/// 使用 `{endpoint}/{bucket}/{path}` 形式的 path-style 地址, 可选 Bearer 令牌。
/// 不支持列举, 列举请求会返回错误, 由上层改用本地回退层列举。
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &PrimaryStoreConfig) -> CrawlerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| CrawlerError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "primary"
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size = body.len()))]
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CrawlerResult<()> {
        validate_object_path(path)?;

        let request = self
            .client
            .put(self.object_url(path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CrawlerError::Network(format!("主存储写入请求失败 {path}: {e}")))?;

        if !response.status().is_success() {
            return Err(CrawlerError::storage(format!(
                "主存储写入失败 {path}: HTTP {}",
                response.status()
            )));
        }

        debug!("主存储写入成功: {}", path);
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, path: &str) -> CrawlerResult<Option<Vec<u8>>> {
        validate_object_path(path)?;

        let response = self
            .authorize(self.client.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| CrawlerError::Network(format!("主存储读取请求失败 {path}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| CrawlerError::Network(format!("读取响应体失败 {path}: {e}")))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(CrawlerError::storage(format!(
                "主存储读取失败 {path}: HTTP {status}"
            ))),
        }
    }

    async fn list_objects(&self, prefix: &str, _limit: usize) -> CrawlerResult<Vec<String>> {
        Err(CrawlerError::storage(format!(
            "主存储不支持列举对象: {prefix}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_is_path_style() {
        let store = HttpObjectStore::new(&PrimaryStoreConfig {
            endpoint: "http://127.0.0.1:9000/".to_string(),
            bucket: "crawl".to_string(),
            access_token: None,
            request_timeout_seconds: 5,
        })
        .unwrap();

        assert_eq!(
            store.object_url("rawHtml/2024/01/01/abc.html"),
            "http://127.0.0.1:9000/crawl/rawHtml/2024/01/01/abc.html"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let store = HttpObjectStore::new(&PrimaryStoreConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            bucket: "crawl".to_string(),
            access_token: Some("token".to_string()),
            request_timeout_seconds: 1,
        })
        .unwrap();

        let result = store
            .put_object("rawHtml/2024/01/01/abc.html", b"x".to_vec(), "text/html")
            .await;
        assert!(matches!(result, Err(CrawlerError::Network(_))));
    }
}
