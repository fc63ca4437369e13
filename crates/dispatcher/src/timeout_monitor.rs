use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::state::SharedClusterState;
use crate::task_registry::RequeueOutcome;

/// 执行超时监控
///
/// 只看任务期限, 不关心节点健康; 超时任务所在节点的状态保持不变。
#[derive(Clone)]
pub struct TimeoutMonitor {
    state: SharedClusterState,
    sweep_interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(state: SharedClusterState, sweep_interval: Duration) -> Self {
        Self {
            state,
            sweep_interval,
        }
    }

    /// 重新入队所有已过期限的任务
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<RequeueOutcome> {
        let mut state = self.state.lock().await;
        let expired = state.tasks().expired_assignments(now);
        if expired.is_empty() {
            return Vec::new();
        }

        let mut requeued = Vec::with_capacity(expired.len());
        for task_id in expired {
            match state.timeout_task(&task_id, now) {
                Ok(outcome) => requeued.push(outcome),
                Err(e) => error!("处理超时任务 {} 时出错: {}", task_id, e),
            }
        }

        info!("超时检测: {} 个任务重新入队", requeued.len());
        requeued
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("启动超时检测循环, 间隔 {:?}", self.sweep_interval);
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("收到停止信号，退出超时检测循环");
                        break;
                    }
                }
            }
        })
    }
}
