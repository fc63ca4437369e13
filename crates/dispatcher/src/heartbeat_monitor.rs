use std::time::Duration;

use chrono::{DateTime, Utc};
use crawler_core::MasterConfig;
use crawler_domain::{NodeId, NodeStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::state::SharedClusterState;
use crate::task_registry::RequeueOutcome;

/// 心跳检测配置
#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// 工作节点心跳间隔
    pub heartbeat_interval: Duration,
    /// 静默超过 missed_threshold 个间隔 → Suspected
    pub missed_threshold: u32,
    /// 静默超过 fail_threshold 个间隔 → Failed
    pub fail_threshold: u32,
    /// 检测间隔
    pub sweep_interval: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self::from(&MasterConfig::default())
    }
}

impl From<&MasterConfig> for HeartbeatMonitorConfig {
    fn from(config: &MasterConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            missed_threshold: config.missed_threshold,
            fail_threshold: config.fail_threshold,
            sweep_interval: config.sweep_interval(),
        }
    }
}

impl HeartbeatMonitorConfig {
    fn suspect_after(&self) -> chrono::Duration {
        to_chrono(self.heartbeat_interval * self.missed_threshold)
    }

    fn fail_after(&self) -> chrono::Duration {
        to_chrono(self.heartbeat_interval * self.fail_threshold)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// 一次检测的结果
#[derive(Debug, Default, Clone)]
pub struct HeartbeatSweepReport {
    pub suspected: Vec<NodeId>,
    pub failed: Vec<NodeId>,
    pub requeued: Vec<RequeueOutcome>,
}

impl HeartbeatSweepReport {
    pub fn is_empty(&self) -> bool {
        self.suspected.is_empty() && self.failed.is_empty()
    }
}

/// 心跳监控: 根据最后心跳时间推进节点状态
///
/// 检测是幂等的, 调度循环和独立的后台任务可以同时调用。
#[derive(Clone)]
pub struct HeartbeatMonitor {
    state: SharedClusterState,
    config: HeartbeatMonitorConfig,
}

impl HeartbeatMonitor {
    pub fn new(state: SharedClusterState, config: HeartbeatMonitorConfig) -> Self {
        Self { state, config }
    }

    pub fn config(&self) -> &HeartbeatMonitorConfig {
        &self.config
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> HeartbeatSweepReport {
        let suspect_after = self.config.suspect_after();
        let fail_after = self.config.fail_after();
        let mut report = HeartbeatSweepReport::default();

        let mut state = self.state.lock().await;

        let mut to_fail = Vec::new();
        let mut to_suspect = Vec::new();
        for node in state.nodes().iter() {
            if node.status == NodeStatus::Failed {
                continue;
            }
            let age = node.heartbeat_age(now);
            if age > fail_after {
                to_fail.push((node.id.clone(), age.num_seconds()));
            } else if age > suspect_after && node.status == NodeStatus::Active {
                to_suspect.push((node.id.clone(), age.num_seconds()));
            }
        }

        for (node_id, silence) in to_suspect {
            match state.suspect_node(&node_id, silence) {
                Ok(true) => report.suspected.push(node_id),
                Ok(false) => {}
                Err(e) => error!("标记节点 {} 为 Suspected 时出错: {}", node_id, e),
            }
        }

        for (node_id, silence) in to_fail {
            match state.fail_node(&node_id, silence, now) {
                Ok(requeued) => {
                    report.requeued.extend(requeued);
                    report.failed.push(node_id);
                }
                Err(e) => error!("标记节点 {} 为 Failed 时出错: {}", node_id, e),
            }
        }

        if !report.is_empty() {
            info!(
                "心跳检测: {} 个节点可疑, {} 个节点失效, {} 个任务重新入队",
                report.suspected.len(),
                report.failed.len(),
                report.requeued.len()
            );
        }
        report
    }

    /// 启动独立的检测循环, 收到关闭信号后退出
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("启动心跳检测循环, 间隔 {:?}", self.config.sweep_interval);
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("收到停止信号，退出心跳检测循环");
                        break;
                    }
                }
            }
        })
    }
}
