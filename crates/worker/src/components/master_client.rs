use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crawler_core::{CrawlerError, CrawlerResult, WorkerConfig};
use crawler_domain::{Heartbeat, NodeId, TaskAssignment, TaskReport};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 上报重试策略: 指数退避加随机抖动
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            attempts: config.send_retry_attempts.max(1),
            base_delay: Duration::from_millis(config.send_retry_base_delay_ms),
            ..Self::default()
        }
    }

    /// 第 retry 次重试前的等待时间, retry 从 0 开始
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let capped = (base * 2f64.powi(retry as i32)).min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

/// 注册成功后主节点返回的信息
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub node_id: NodeId,
    pub lifetime: u32,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// 主节点 HTTP 客户端
pub struct MasterClient {
    master_url: String,
    node_id: NodeId,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl MasterClient {
    pub fn new(master_url: impl Into<String>, node_id: NodeId, retry: RetryPolicy) -> Self {
        Self {
            master_url: master_url.into().trim_end_matches('/').to_string(),
            node_id,
            http_client: reqwest::Client::new(),
            retry,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn master_url(&self) -> &str {
        &self.master_url
    }

    pub async fn register(&self) -> CrawlerResult<Registration> {
        let url = format!(
            "{}/api/v1/nodes/{}/register",
            self.master_url, self.node_id
        );
        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| network_error("注册", e))?;

        let registration: Registration = read_data(check_status(response).await?).await?;
        info!(
            "节点 {} 注册成功, 生命周期 {}",
            registration.node_id, registration.lifetime
        );
        Ok(registration)
    }

    /// 发送心跳; 节点已被判定失效时返回 `NodeFailed`
    pub async fn send_heartbeat(&self) -> CrawlerResult<()> {
        let url = format!(
            "{}/api/v1/nodes/{}/heartbeat",
            self.master_url, self.node_id
        );
        let heartbeat = Heartbeat {
            node_id: self.node_id.clone(),
            timestamp: Utc::now(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&heartbeat)
            .send()
            .await
            .map_err(|e| network_error("心跳", e))?;

        check_status(response).await?;
        debug!("节点 {} 心跳发送成功", self.node_id);
        Ok(())
    }

    pub async fn poll_assignments(&self) -> CrawlerResult<Vec<TaskAssignment>> {
        let url = format!(
            "{}/api/v1/nodes/{}/assignments",
            self.master_url, self.node_id
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| network_error("拉取分配", e))?;

        read_data(check_status(response).await?).await
    }

    /// 上报任务结果, 对可重试错误按退避策略重试
    pub async fn report(&self, report: &TaskReport) -> CrawlerResult<()> {
        let url = format!("{}/api/v1/reports", self.master_url);
        let mut retry = 0;

        loop {
            let result = match self.http_client.post(&url).json(report).send().await {
                Ok(response) => check_status(response).await.map(|_| ()),
                Err(e) => Err(network_error("上报", e)),
            };

            match result {
                Ok(()) => {
                    debug!("任务 {} 结果上报成功", report.task_id);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && retry + 1 < self.retry.attempts => {
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        "任务 {} 上报失败 (第 {} 次): {}, {:?} 后重试",
                        report.task_id,
                        retry + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 在后台任务中上报, 调用方不等待结果
    pub fn report_detached(self: &Arc<Self>, report: TaskReport) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = client.report(&report).await {
                error!("任务 {} 结果上报最终失败: {}", report.task_id, e);
            }
        })
    }
}

fn network_error(operation: &str, err: reqwest::Error) -> CrawlerError {
    if err.is_timeout() {
        CrawlerError::Timeout(format!("{}请求超时: {}", operation, err))
    } else {
        CrawlerError::Network(format!("{}请求失败: {}", operation, err))
    }
}

async fn check_status(response: reqwest::Response) -> CrawlerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::CONFLICT => CrawlerError::NodeFailed { id: body },
        StatusCode::SERVICE_UNAVAILABLE => CrawlerError::ResourceExhausted(body),
        StatusCode::NOT_FOUND => CrawlerError::Protocol(format!("HTTP 404: {}", body)),
        s if s.is_client_error() => CrawlerError::Protocol(format!("HTTP {}: {}", s, body)),
        s => CrawlerError::Network(format!("HTTP {}: {}", s, body)),
    };
    Err(err)
}

async fn read_data<T: DeserializeOwned>(response: reqwest::Response) -> CrawlerResult<T> {
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| CrawlerError::Serialization(format!("响应解析失败: {}", e)))?;
    envelope
        .data
        .ok_or_else(|| CrawlerError::Serialization("响应缺少 data 字段".to_string()))
}
