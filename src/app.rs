use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use crawler_api::create_app;
use crawler_core::AppConfig;
use crawler_dispatcher::{strategy_from_name, ClusterState, MasterController, MasterScheduler};
use crawler_domain::{AssignmentSink, ContentStore, TaskSource};
use crawler_infrastructure::{
    init_metrics, InMemoryAssignmentOutbox, MetricsCollector, SnapshotWriter, TieredContentStore,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info, warn};

/// 主节点应用: 组装调度器、监控任务、HTTP 接口
pub struct Application {
    config: AppConfig,
    scheduler: Arc<MasterScheduler>,
    controller: MasterController,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化主节点, 调度策略 {}, 存储模式 {}",
            config.master.dispatch_strategy, config.storage.mode
        );

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_bind_address
                .parse()
                .with_context(|| {
                    format!("指标监听地址无效: {}", config.observability.metrics_bind_address)
                })?;
            init_metrics(addr)?;
        }
        let metrics = MetricsCollector::new();

        let state = ClusterState::new(&config.master, metrics.clone()).shared();
        let outbox = Arc::new(InMemoryAssignmentOutbox::new());
        let content_store =
            TieredContentStore::from_config(&config.storage).context("创建内容存储失败")?;
        let strategy =
            strategy_from_name(&config.master.dispatch_strategy).context("创建调度策略失败")?;

        let scheduler = Arc::new(MasterScheduler::new(
            config.master.clone(),
            state.clone(),
            strategy,
            outbox.clone() as Arc<dyn AssignmentSink>,
            Arc::new(content_store) as Arc<dyn ContentStore>,
            metrics,
        ));
        let controller = MasterController::new(
            state,
            outbox,
            scheduler.report_sender(),
            scheduler.subscribe_snapshots(),
            config.master.heartbeat_interval_seconds,
        );

        if !config.master.seed_urls.is_empty() {
            let summary = controller
                .enqueue_urls(&config.master.seed_urls, TaskSource::Seed)
                .await;
            info!(
                "种子URL: 加入 {}, 重复 {}, 拒绝 {}",
                summary.accepted.len(),
                summary.duplicates,
                summary.rejected.len()
            );
            for url in &summary.rejected {
                warn!("种子URL无效, 已忽略: {}", url);
            }
        }

        Ok(Self {
            config,
            scheduler,
            controller,
        })
    }

    pub fn controller(&self) -> &MasterController {
        &self.controller
    }

    /// 运行直到收到关闭信号, 或在 `exit_when_drained` 时队列处理完毕
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let (stop_tx, _) = broadcast::channel(4);
        let mut handles: Vec<JoinHandle<()>> = vec![
            self.scheduler
                .heartbeat_monitor()
                .clone()
                .spawn(stop_tx.subscribe()),
            self.scheduler
                .timeout_monitor()
                .clone()
                .spawn(stop_tx.subscribe()),
        ];

        if let Some(path) = &self.config.observability.snapshot_path {
            handles.push(
                SnapshotWriter::new(path)
                    .spawn(self.scheduler.subscribe_snapshots(), stop_tx.subscribe()),
            );
        }

        handles.push(self.start_api(stop_tx.subscribe()).await?);

        let result = self.scheduler.run(shutdown_rx).await;

        // 调度循环结束后停止其余组件
        let _ = stop_tx.send(());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("组件退出异常: {}", e);
            }
        }

        result.context("调度循环异常退出")?;
        info!("主节点已停止");
        Ok(())
    }

    async fn start_api(&self, mut stop_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let app = create_app(self.controller.clone(), &self.config.api);
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        let local_addr = listener
            .local_addr()
            .context("读取监听地址失败")?;
        info!("API服务器启动在 http://{}", local_addr);

        Ok(tokio::spawn(async move {
            let server = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.recv().await;
                });
            if let Err(e) = server.await {
                error!("API服务器运行失败: {}", e);
            }
            info!("API服务器已停止");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.api.bind_address = "127.0.0.1:0".to_string();
        config.storage.fallback_dir = dir.join("crawled").to_string_lossy().into_owned();
        config.observability.snapshot_path = Some(
            dir.join("monitoring/monitoring_data.json")
                .to_string_lossy()
                .into_owned(),
        );
        config.master.tick_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_seed_urls_enqueued_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.master.seed_urls = vec![
            "https://example.com/".to_string(),
            "https://example.com/#frag".to_string(),
            "not a url".to_string(),
        ];

        let app = Application::new(config).await.unwrap();
        assert!(app.controller().nodes().await.is_empty());

        let task_id = crawler_domain::TaskId::from_normalized_url("https://example.com/");
        assert!(app.controller().task(task_id.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn test_exit_when_drained_stops_all_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.master.exit_when_drained = true;

        let app = Application::new(config).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::time::timeout(Duration::from_secs(5), app.run(shutdown_rx))
            .await
            .unwrap()
            .unwrap();

        // 退出前写出最后一份快照
        assert!(dir.path().join("monitoring/monitoring_data.json").exists());
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_application() {
        let dir = tempfile::tempdir().unwrap();
        let app = Arc::new(Application::new(test_config(dir.path())).await.unwrap());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_strategy_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.master.dispatch_strategy = "random".to_string();
        assert!(Application::new(config).await.is_err());
    }
}
