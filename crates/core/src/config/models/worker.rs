use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 为空时使用主机名
    pub node_id: String,
    pub master_url: String,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_ms: u64,
    pub send_retry_attempts: u32,
    pub send_retry_base_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            master_url: "http://127.0.0.1:8080".to_string(),
            heartbeat_interval_seconds: 10,
            poll_interval_ms: 1000,
            send_retry_attempts: 3,
            send_retry_base_delay_ms: 200,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.master_url.starts_with("http://") && !self.master_url.starts_with("https://") {
            return Err(anyhow::anyhow!("主节点地址必须以http://或https://开头"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.send_retry_attempts == 0 {
            return Err(anyhow::anyhow!("发送重试次数必须大于0"));
        }

        Ok(())
    }
}
