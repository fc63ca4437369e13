use std::path::PathBuf;

use crawler_core::CrawlerResult;
use crawler_domain::MonitoringSnapshot;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 将最新的监控快照写入 JSON 文件, 供外部看板读取
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, snapshot: &MonitoringSnapshot) -> CrawlerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, body).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("监控快照已写入: {}", self.path.display());
        Ok(())
    }

    /// 每次快照更新时落盘, 收到关闭信号后写出最后一份并退出
    pub fn spawn(
        self,
        mut snapshots: watch::Receiver<MonitoringSnapshot>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("监控快照写入器已启动: {}", self.path.display());
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        if let Err(e) = self.write(&snapshot).await {
                            warn!("写入监控快照失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let snapshot = snapshots.borrow().clone();
                        if let Err(e) = self.write(&snapshot).await {
                            warn!("写入最终监控快照失败: {}", e);
                        }
                        break;
                    }
                }
            }
            info!("监控快照写入器已停止");
        })
    }
}
