use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crawler_core::CrawlerError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::MasterClient;

/// 周期性向主节点发送心跳
pub struct HeartbeatManager {
    client: Arc<MasterClient>,
    heartbeat_interval: Duration,
    needs_registration: Arc<AtomicBool>,
}

impl HeartbeatManager {
    pub fn new(
        client: Arc<MasterClient>,
        heartbeat_interval: Duration,
        needs_registration: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            heartbeat_interval,
            needs_registration,
        }
    }

    /// 发送一次心跳; 主节点判定本节点失效时置位重新注册标记
    pub async fn beat(&self) {
        match self.client.send_heartbeat().await {
            Ok(()) => {}
            Err(CrawlerError::NodeFailed { .. }) => {
                warn!("节点 {} 已被主节点判定失效, 等待重新注册", self.client.node_id());
                self.needs_registration.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("心跳发送失败: {}", e),
        }
    }

    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.beat().await,
                    _ = shutdown_rx.recv() => {
                        info!("心跳任务退出");
                        break;
                    }
                }
            }
        })
    }
}
