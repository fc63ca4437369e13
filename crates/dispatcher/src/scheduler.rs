use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crawler_core::{CrawlerError, CrawlerResult, MasterConfig};
use crawler_domain::{
    AssignmentSink, ContentKey, ContentMetadata, ContentStore, MonitoringSnapshot, NodeId,
    ReportStatus, StorageTier, TaskId, TaskReport, TaskSource,
};
use crawler_infrastructure::MetricsCollector;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig};
use crate::state::SharedClusterState;
use crate::strategies::NodeSelectionStrategy;
use crate::timeout_monitor::TimeoutMonitor;

/// 停止时等待进行中写入的最长时间
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 上报入口, HTTP 层通过它把上报交给调度器
///
/// 队列满时立即返回错误, 不会阻塞调用方。
#[derive(Clone)]
pub struct ReportSender {
    sender: mpsc::Sender<TaskReport>,
}

impl ReportSender {
    pub fn submit(&self, report: TaskReport) -> CrawlerResult<()> {
        self.sender.try_send(report).map_err(|e| match e {
            TrySendError::Full(_) => CrawlerError::ResourceExhausted("上报队列已满".to_string()),
            TrySendError::Closed(_) => CrawlerError::Internal("调度器已停止".to_string()),
        })
    }
}

/// 后台写入的结果
#[derive(Debug)]
struct WriteOutcome {
    task_id: TaskId,
    node_id: NodeId,
    assignment_id: Option<Uuid>,
    result: CrawlerResult<StorageTier>,
    elapsed: Duration,
}

/// 单个调度周期的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub suspected: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub assigned: usize,
    pub reports_processed: usize,
    pub reports_discarded: usize,
    pub writes_started: usize,
    pub writes_completed: usize,
    pub writes_failed: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// 主节点调度器
///
/// 每个周期依次执行: 回收 (心跳检测 + 超时检测) → 分配 → 收集上报与写入结果 → 发布监控快照。
pub struct MasterScheduler {
    config: MasterConfig,
    state: SharedClusterState,
    strategy: Arc<dyn NodeSelectionStrategy>,
    assignments: Arc<dyn AssignmentSink>,
    content_store: Arc<dyn ContentStore>,
    heartbeat_monitor: HeartbeatMonitor,
    timeout_monitor: TimeoutMonitor,
    report_tx: mpsc::Sender<TaskReport>,
    report_rx: Mutex<mpsc::Receiver<TaskReport>>,
    write_tx: mpsc::UnboundedSender<WriteOutcome>,
    write_rx: Mutex<mpsc::UnboundedReceiver<WriteOutcome>>,
    write_permits: Arc<Semaphore>,
    inflight_writes: Arc<AtomicUsize>,
    snapshot_tx: watch::Sender<MonitoringSnapshot>,
    metrics: MetricsCollector,
}

impl MasterScheduler {
    pub fn new(
        config: MasterConfig,
        state: SharedClusterState,
        strategy: Arc<dyn NodeSelectionStrategy>,
        assignments: Arc<dyn AssignmentSink>,
        content_store: Arc<dyn ContentStore>,
        metrics: MetricsCollector,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::channel(config.report_queue_capacity.max(1));
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(MonitoringSnapshot::empty(Utc::now()));

        let heartbeat_monitor =
            HeartbeatMonitor::new(state.clone(), HeartbeatMonitorConfig::from(&config));
        let timeout_monitor = TimeoutMonitor::new(state.clone(), config.sweep_interval());

        Self {
            write_permits: Arc::new(Semaphore::new(config.max_inflight_writes.max(1))),
            config,
            state,
            strategy,
            assignments,
            content_store,
            heartbeat_monitor,
            timeout_monitor,
            report_tx,
            report_rx: Mutex::new(report_rx),
            write_tx,
            write_rx: Mutex::new(write_rx),
            inflight_writes: Arc::new(AtomicUsize::new(0)),
            snapshot_tx,
            metrics,
        }
    }

    pub fn report_sender(&self) -> ReportSender {
        ReportSender {
            sender: self.report_tx.clone(),
        }
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<MonitoringSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> &SharedClusterState {
        &self.state
    }

    pub fn heartbeat_monitor(&self) -> &HeartbeatMonitor {
        &self.heartbeat_monitor
    }

    pub fn timeout_monitor(&self) -> &TimeoutMonitor {
        &self.timeout_monitor
    }

    pub fn inflight_writes(&self) -> usize {
        self.inflight_writes.load(Ordering::SeqCst)
    }

    /// 执行一个完整的调度周期
    #[instrument(skip(self), level = "debug")]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let mut cycle = CycleReport::default();

        let heartbeat = self.heartbeat_monitor.sweep(now).await;
        cycle.suspected = heartbeat.suspected.len();
        cycle.failed = heartbeat.failed.len();
        cycle.timed_out = self.timeout_monitor.sweep(now).await.len();

        cycle.assigned = self.assign(now).await;

        self.collect_reports(now, &mut cycle).await;
        self.collect_writes(now, &mut cycle).await;

        self.publish_snapshot(now).await;
        self.metrics.record_cycle(started.elapsed().as_secs_f64());
        cycle
    }

    async fn assign(&self, now: DateTime<Utc>) -> usize {
        let assignments = self
            .state
            .lock()
            .await
            .assign_next(self.strategy.as_ref(), now);

        let count = assignments.len();
        for (node_id, assignment) in assignments {
            let task_id = assignment.task_id.clone();
            // 投递失败的任务由超时检测回收
            if let Err(e) = self.assignments.deliver(&node_id, assignment).await {
                warn!("任务 {} 投递到节点 {} 失败: {}", task_id, node_id, e);
            }
        }
        count
    }

    async fn collect_reports(&self, now: DateTime<Utc>, cycle: &mut CycleReport) {
        let reports = {
            let mut receiver = self.report_rx.lock().await;
            let mut reports = Vec::new();
            while let Ok(report) = receiver.try_recv() {
                reports.push(report);
            }
            reports
        };

        for report in reports {
            cycle.reports_processed += 1;
            self.handle_report(report, now, cycle).await;
        }
    }

    async fn handle_report(&self, report: TaskReport, now: DateTime<Utc>, cycle: &mut CycleReport) {
        let task_id = match report.validate() {
            Ok(task_id) => task_id,
            Err(e) => {
                warn!("丢弃格式错误的上报: {}", e);
                self.state
                    .lock()
                    .await
                    .record_discarded(&report.task_id, &report.node_id, "protocol_error");
                cycle.reports_discarded += 1;
                return;
            }
        };

        match report.status {
            ReportStatus::Failure => {
                let error = report.error.as_deref().unwrap_or("unknown error");
                let mut state = self.state.lock().await;
                if let Err(e) =
                    state.fail_report(&task_id, &report.node_id, report.assignment_id, error, now)
                {
                    debug!("失败上报已过期 {}: {}", task_id, e);
                    state.record_discarded(task_id.as_str(), &report.node_id, "stale_report");
                    cycle.reports_discarded += 1;
                }
            }
            ReportStatus::Success => {
                let url = {
                    let mut state = self.state.lock().await;
                    match state.accept_success(&task_id, &report.node_id, report.assignment_id, now)
                    {
                        Ok(url) => {
                            for link in &report.discovered_urls {
                                if let Err(e) = state.enqueue_url(link, TaskSource::Discovered, now)
                                {
                                    debug!("忽略无效链接 {}: {}", link, e);
                                }
                            }
                            url
                        }
                        Err(e) => {
                            debug!("成功上报已过期 {}: {}", task_id, e);
                            state.record_discarded(
                                task_id.as_str(),
                                &report.node_id,
                                "stale_report",
                            );
                            cycle.reports_discarded += 1;
                            return;
                        }
                    }
                };

                self.spawn_write(task_id, report, &url, now);
                cycle.writes_started += 1;
            }
        }
    }

    /// 在后台写入内容, 并发数受信号量限制
    ///
    /// 日期分区取主节点的写入时间, 与工作节点上报的 `crawled_at` 无关。
    fn spawn_write(&self, task_id: TaskId, report: TaskReport, url: &str, now: DateTime<Utc>) {
        let metadata = report
            .metadata
            .unwrap_or_else(|| ContentMetadata::minimal(url, now));
        let key = ContentKey::new(&task_id, now);
        let raw_payload = report.raw_payload.unwrap_or_default();
        let processed_text = report.processed_text.unwrap_or_default();
        let node_id = report.node_id;
        let assignment_id = report.assignment_id;

        let store = self.content_store.clone();
        let permits = self.write_permits.clone();
        let outcomes = self.write_tx.clone();
        self.inflight_writes.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let started = Instant::now();
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    store
                        .put(&key, &raw_payload, &processed_text, &metadata)
                        .await
                }
                Err(_) => Err(CrawlerError::Internal("写入信号量已关闭".to_string())),
            };

            let outcome = WriteOutcome {
                task_id,
                node_id,
                assignment_id,
                result,
                elapsed: started.elapsed(),
            };
            if outcomes.send(outcome).is_err() {
                debug!("调度器已停止, 丢弃写入结果");
            }
        });
    }

    async fn collect_writes(&self, now: DateTime<Utc>, cycle: &mut CycleReport) {
        let outcomes = {
            let mut receiver = self.write_rx.lock().await;
            let mut outcomes = Vec::new();
            while let Ok(outcome) = receiver.try_recv() {
                outcomes.push(outcome);
            }
            outcomes
        };

        for outcome in outcomes {
            self.apply_write_outcome(outcome, now, cycle).await;
        }
    }

    async fn apply_write_outcome(
        &self,
        outcome: WriteOutcome,
        now: DateTime<Utc>,
        cycle: &mut CycleReport,
    ) {
        // 结果应用后才算写入结束
        self.inflight_writes.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        match outcome.result {
            Ok(tier) => {
                self.metrics
                    .record_storage_write(tier, outcome.elapsed.as_secs_f64());
                match state.complete(
                    &outcome.task_id,
                    &outcome.node_id,
                    outcome.assignment_id,
                    tier,
                    now,
                ) {
                    Ok(()) => cycle.writes_completed += 1,
                    Err(e) => {
                        debug!("内容已写入但任务 {} 不再归属该节点: {}", outcome.task_id, e);
                        state.record_discarded(
                            outcome.task_id.as_str(),
                            &outcome.node_id,
                            "stale_write",
                        );
                        cycle.reports_discarded += 1;
                    }
                }
            }
            Err(e) => {
                self.metrics.record_storage_failure();
                cycle.writes_failed += 1;
                if let Err(requeue_err) = state.storage_fatal(
                    &outcome.task_id,
                    &outcome.node_id,
                    outcome.assignment_id,
                    &e.to_string(),
                    now,
                ) {
                    debug!(
                        "写入失败的任务 {} 已被回收: {}",
                        outcome.task_id, requeue_err
                    );
                }
            }
        }
    }

    async fn publish_snapshot(&self, now: DateTime<Utc>) {
        let inflight = self.inflight_writes();
        let snapshot = self.state.lock().await.snapshot(now, inflight);
        self.metrics
            .update_state(&snapshot.tasks, &snapshot.nodes, inflight);
        self.snapshot_tx.send_replace(snapshot);
    }

    /// 没有等待中或执行中的任务, 也没有进行中的写入
    pub async fn is_drained(&self) -> bool {
        self.inflight_writes() == 0 && self.state.lock().await.task_counts().is_drained()
    }

    /// 等待进行中的写入完成并应用结果
    pub async fn finish_pending_writes(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut cycle = CycleReport::default();

        while self.inflight_writes() > 0 {
            let next = {
                let mut receiver = self.write_rx.lock().await;
                tokio::time::timeout_at(deadline, receiver.recv()).await
            };
            match next {
                Ok(Some(outcome)) => self.apply_write_outcome(outcome, Utc::now(), &mut cycle).await,
                Ok(None) => break,
                Err(_) => {
                    warn!("等待内容写入超时, 仍有 {} 个写入未完成", self.inflight_writes());
                    break;
                }
            }
        }

        self.collect_writes(Utc::now(), &mut cycle).await;
        if cycle.writes_completed + cycle.writes_failed > 0 {
            info!(
                "停止前完成 {} 个写入, {} 个写入失败",
                cycle.writes_completed, cycle.writes_failed
            );
        }
    }

    /// 调度主循环
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> CrawlerResult<()> {
        info!(
            "启动调度循环: 周期 {:?}, 策略 {}",
            self.config.tick_interval(),
            self.strategy.name()
        );
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cycle = self.run_cycle(Utc::now()).await;
                    if !cycle.is_idle() {
                        debug!(?cycle, "调度周期完成");
                    }
                    if self.config.exit_when_drained && self.is_drained().await {
                        info!("所有任务已处理完毕，退出调度循环");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出调度循环");
                    break;
                }
            }
        }

        self.finish_pending_writes(WRITE_DRAIN_TIMEOUT).await;
        self.publish_snapshot(Utc::now()).await;
        Ok(())
    }
}
