use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 主节点调度与故障检测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// 工作节点心跳间隔
    pub heartbeat_interval_seconds: u64,
    /// 超过 missed_threshold 个心跳间隔未收到心跳, 节点进入 Suspected
    pub missed_threshold: u32,
    /// 超过 fail_threshold 个心跳间隔未收到心跳, 节点进入 Failed
    pub fail_threshold: u32,
    pub task_timeout_seconds: u64,
    /// 任务最大尝试次数, 第 max_attempts 次失败后进入 Dead
    pub max_attempts: u32,
    pub sweep_interval_seconds: u64,
    pub tick_interval_ms: u64,
    pub dispatch_strategy: String, // "round_robin", "least_recently_assigned"
    pub report_queue_capacity: usize,
    pub max_inflight_writes: usize,
    pub recent_transitions_limit: usize,
    pub seed_urls: Vec<String>,
    /// 队列清空且没有进行中的任务时退出调度循环
    pub exit_when_drained: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            missed_threshold: 3,
            fail_threshold: 6,
            task_timeout_seconds: 120,
            max_attempts: 3,
            sweep_interval_seconds: 5,
            tick_interval_ms: 1000,
            dispatch_strategy: "round_robin".to_string(),
            report_queue_capacity: 1024,
            max_inflight_writes: 16,
            recent_transitions_limit: 50,
            seed_urls: Vec::new(),
            exit_when_drained: false,
        }
    }
}

impl MasterConfig {
    pub const VALID_STRATEGIES: [&'static str; 2] = ["round_robin", "least_recently_assigned"];

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.missed_threshold == 0 {
            return Err(anyhow::anyhow!("心跳丢失阈值必须大于0"));
        }

        if self.fail_threshold <= self.missed_threshold {
            return Err(anyhow::anyhow!(
                "失效阈值({})必须大于疑似阈值({})",
                self.fail_threshold,
                self.missed_threshold
            ));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.sweep_interval_seconds == 0 || self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("扫描间隔和调度周期必须大于0"));
        }

        if self.report_queue_capacity == 0 || self.max_inflight_writes == 0 {
            return Err(anyhow::anyhow!("上报队列容量和并发写入数必须大于0"));
        }

        if !Self::VALID_STRATEGIES.contains(&self.dispatch_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的调度策略: {}，支持的策略: {:?}",
                self.dispatch_strategy,
                Self::VALID_STRATEGIES
            ));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
