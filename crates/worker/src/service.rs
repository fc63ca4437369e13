use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crawler_core::{CrawlerError, CrawlerResult, WorkerConfig};
use crawler_domain::{NodeId, TaskAssignment, TaskReport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::components::{HeartbeatManager, MasterClient, PageProcessor, RetryPolicy};

/// 工作节点服务
///
/// 注册 → 心跳 → 拉取分配 → 处理页面 → 上报结果。一次只处理一个分配,
/// 上报在后台发送, 不阻塞下一次拉取。
pub struct WorkerService {
    config: WorkerConfig,
    client: Arc<MasterClient>,
    processor: Arc<dyn PageProcessor>,
    needs_registration: Arc<AtomicBool>,
}

impl WorkerService {
    pub fn new(config: WorkerConfig, processor: Arc<dyn PageProcessor>) -> CrawlerResult<Self> {
        let node_id = resolve_node_id(&config)?;
        let client = Arc::new(MasterClient::new(
            config.master_url.clone(),
            node_id,
            RetryPolicy::from_config(&config),
        ));

        Ok(Self {
            config,
            client,
            processor,
            needs_registration: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        self.client.node_id()
    }

    pub fn client(&self) -> Arc<MasterClient> {
        Arc::clone(&self.client)
    }

    /// 需要时重新注册, 返回本次是否发生了注册
    pub async fn ensure_registered(&self) -> CrawlerResult<bool> {
        if !self.needs_registration.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.client.register().await?;
        self.needs_registration.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// 执行一轮拉取与处理, 返回处理的分配数
    pub async fn run_once(&self) -> CrawlerResult<usize> {
        self.ensure_registered().await?;

        let assignments = match self.client.poll_assignments().await {
            Ok(assignments) => assignments,
            Err(CrawlerError::NodeFailed { .. }) => {
                warn!("节点 {} 拉取分配被拒绝, 下一轮重新注册", self.node_id());
                self.needs_registration.store(true, Ordering::SeqCst);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let count = assignments.len();
        for assignment in assignments {
            self.process_assignment(assignment).await;
        }
        Ok(count)
    }

    /// 处理单个分配并在后台上报结果
    pub async fn process_assignment(&self, assignment: TaskAssignment) -> JoinHandle<()> {
        debug!(
            "开始处理任务 {} (第 {} 次尝试): {}",
            assignment.task_id, assignment.attempt, assignment.url
        );

        let report = match self.processor.process(&assignment).await {
            Ok(output) => output.into_report(self.node_id().clone(), &assignment),
            Err(e) => {
                warn!("任务 {} 处理失败: {}", assignment.task_id, e);
                TaskReport::failure(
                    self.node_id().clone(),
                    &assignment.task_id,
                    assignment.assignment_id,
                    e.to_string(),
                )
            }
        };

        self.client.report_detached(report)
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> CrawlerResult<()> {
        info!("工作节点 {} 启动, 主节点 {}", self.node_id(), self.config.master_url);

        let heartbeat = HeartbeatManager::new(
            Arc::clone(&self.client),
            Duration::from_secs(self.config.heartbeat_interval_seconds),
            Arc::clone(&self.needs_registration),
        );
        let heartbeat_handle = heartbeat.spawn(shutdown_rx.resubscribe());
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("工作节点 {} 收到关闭信号", self.node_id());
                    break;
                }
                result = self.run_once() => {
                    match result {
                        // 有任务时立即继续拉取
                        Ok(n) if n > 0 => continue,
                        Ok(_) => {}
                        Err(e) => error!("工作节点循环出错: {}", e),
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }

        if let Err(e) = heartbeat_handle.await {
            warn!("心跳任务异常结束: {}", e);
        }
        Ok(())
    }
}

/// 配置中未指定节点ID时使用主机名
fn resolve_node_id(config: &WorkerConfig) -> CrawlerResult<NodeId> {
    if !config.node_id.is_empty() {
        return Ok(NodeId::new(config.node_id.clone()));
    }

    let hostname = hostname::get()
        .map_err(|e| CrawlerError::config_error(format!("无法获取主机名: {}", e)))?;
    Ok(NodeId::new(hostname.to_string_lossy().into_owned()))
}
