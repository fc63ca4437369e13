#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use chrono::Utc;
    use crawler_api::create_app;
    use crawler_core::{ApiConfig, CrawlerError, CrawlerResult, MasterConfig, WorkerConfig};
    use crawler_dispatcher::{ClusterState, MasterController, MasterScheduler, RoundRobinStrategy};
    use crawler_domain::{
        AssignmentSink, ContentStore, NodeId, NodeStatus, Task, TaskAssignment, TaskId,
        TaskReport, TaskSource, TaskState,
    };
    use crawler_infrastructure::{
        InMemoryAssignmentOutbox, InMemoryObjectStore, MetricsCollector, TieredContentStore,
    };
    use crawler_worker::{
        CrawlOutput, HeartbeatManager, MasterClient, PageProcessor, RetryPolicy, WorkerService,
    };
    use mockall::mock;
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    mock! {
        pub Processor {}

        #[async_trait]
        impl PageProcessor for Processor {
            async fn process(&self, assignment: &TaskAssignment) -> CrawlerResult<CrawlOutput>;
        }
    }

    struct Master {
        url: String,
        scheduler: Arc<MasterScheduler>,
        controller: MasterController,
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn start_master() -> Master {
        let config = MasterConfig::default();
        let metrics = MetricsCollector::new();
        let state = ClusterState::new(&config, metrics.clone()).shared();
        let outbox = Arc::new(InMemoryAssignmentOutbox::new());
        let store = TieredContentStore::single(Arc::new(InMemoryObjectStore::new("memory")));

        let scheduler = Arc::new(MasterScheduler::new(
            config.clone(),
            state.clone(),
            Arc::new(RoundRobinStrategy::new()),
            outbox.clone() as Arc<dyn AssignmentSink>,
            Arc::new(store) as Arc<dyn ContentStore>,
            metrics,
        ));
        let controller = MasterController::new(
            state,
            outbox,
            scheduler.report_sender(),
            scheduler.subscribe_snapshots(),
            config.heartbeat_interval_seconds,
        );

        let url = serve(create_app(controller.clone(), &ApiConfig::default())).await;
        Master {
            url,
            scheduler,
            controller,
        }
    }

    fn worker_config(master_url: &str) -> WorkerConfig {
        WorkerConfig {
            node_id: "w1".to_string(),
            master_url: master_url.to_string(),
            send_retry_base_delay_ms: 10,
            ..WorkerConfig::default()
        }
    }

    /// 反复运行调度周期直到条件满足
    async fn wait_for_task<F>(master: &Master, task_id: &TaskId, condition: F) -> Task
    where
        F: Fn(&Task) -> bool,
    {
        for _ in 0..200 {
            master.scheduler.run_cycle(Utc::now()).await;
            let task = master.controller.task(task_id.as_str()).await.unwrap();
            if condition(&task) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("任务 {} 未在预期时间内达到目标状态", task_id);
    }

    #[tokio::test]
    async fn test_worker_completes_assignment_end_to_end() {
        let master = start_master().await;
        let summary = master
            .controller
            .enqueue_urls(&["https://example.com/".to_string()], TaskSource::Seed)
            .await;
        let task_id = summary.accepted[0].clone();

        let mut processor = MockProcessor::new();
        processor.expect_process().times(1).returning(|assignment| {
            let mut output = CrawlOutput::raw(&assignment.url, "<html>hello</html>");
            output.processed_text = "hello".to_string();
            output.discovered_urls = vec!["https://example.com/next".to_string()];
            Ok(output)
        });

        let worker = WorkerService::new(worker_config(&master.url), Arc::new(processor)).unwrap();
        assert!(worker.ensure_registered().await.unwrap());
        assert!(!worker.ensure_registered().await.unwrap());

        master.scheduler.run_cycle(Utc::now()).await;
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let task = wait_for_task(&master, &task_id, |t| t.state == TaskState::Completed).await;
        assert_eq!(task.attempts, 0);

        let discovered = TaskId::from_normalized_url("https://example.com/next");
        let next = master.controller.task(discovered.as_str()).await.unwrap();
        assert_eq!(next.source, TaskSource::Discovered);
    }

    #[tokio::test]
    async fn test_processor_error_reported_as_failure() {
        let master = start_master().await;
        let summary = master
            .controller
            .enqueue_urls(&["https://example.com/broken".to_string()], TaskSource::Seed)
            .await;
        let task_id = summary.accepted[0].clone();

        let mut processor = MockProcessor::new();
        processor
            .expect_process()
            .returning(|_| Err(CrawlerError::Network("连接被拒绝".to_string())));

        let worker = WorkerService::new(worker_config(&master.url), Arc::new(processor)).unwrap();
        worker.ensure_registered().await.unwrap();
        master.scheduler.run_cycle(Utc::now()).await;
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let task = wait_for_task(&master, &task_id, |t| t.attempts == 1).await;
        let last_error = task.last_error.unwrap();
        assert!(last_error.starts_with("reported_failure"), "{}", last_error);
        assert!(last_error.contains("连接被拒绝"));
    }

    #[tokio::test]
    async fn test_worker_reregisters_after_being_failed() {
        let master = start_master().await;
        let worker = WorkerService::new(
            worker_config(&master.url),
            Arc::new(MockProcessor::new()),
        )
        .unwrap();
        worker.ensure_registered().await.unwrap();

        master
            .scheduler
            .state()
            .lock()
            .await
            .fail_node(&NodeId::new("w1"), 61, Utc::now())
            .unwrap();

        assert!(matches!(
            worker.client().send_heartbeat().await,
            Err(CrawlerError::NodeFailed { .. })
        ));

        // 拉取被拒绝, 下一轮重新注册
        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert_eq!(worker.run_once().await.unwrap(), 0);

        let nodes = master.controller.nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].lifetime, 2);
        assert_eq!(nodes[0].status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_heartbeat_manager_flags_failed_node() {
        let master = start_master().await;
        let client = Arc::new(MasterClient::new(
            master.url.clone(),
            NodeId::new("w1"),
            RetryPolicy::default(),
        ));
        client.register().await.unwrap();

        let needs_registration = Arc::new(AtomicBool::new(false));
        let manager = HeartbeatManager::new(
            Arc::clone(&client),
            Duration::from_millis(20),
            Arc::clone(&needs_registration),
        );

        manager.beat().await;
        assert!(!needs_registration.load(Ordering::SeqCst));

        master
            .scheduler
            .state()
            .lock()
            .await
            .fail_node(&NodeId::new("w1"), 61, Utc::now())
            .unwrap();

        manager.beat().await;
        assert!(needs_registration.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_heartbeat_manager_stops_on_shutdown() {
        let master = start_master().await;
        let client = Arc::new(MasterClient::new(
            master.url.clone(),
            NodeId::new("w1"),
            RetryPolicy::default(),
        ));
        client.register().await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = HeartbeatManager::new(
            client,
            Duration::from_millis(10),
            Arc::new(AtomicBool::new(false)),
        )
        .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    async fn flaky_reports(State(calls): State<Arc<AtomicUsize>>) -> StatusCode {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::ACCEPTED
        }
    }

    async fn rejecting_reports(State(calls): State<Arc<AtomicUsize>>) -> StatusCode {
        calls.fetch_add(1, Ordering::SeqCst);
        StatusCode::BAD_REQUEST
    }

    fn sample_report() -> TaskReport {
        TaskReport::failure(
            NodeId::new("w1"),
            &TaskId::from_normalized_url("https://example.com/"),
            uuid::Uuid::new_v4(),
            "dns",
        )
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_report_retries_when_inbox_full() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/api/v1/reports", post(flaky_reports))
            .with_state(Arc::clone(&calls));
        let url = serve(router).await;

        let client = MasterClient::new(url, NodeId::new("w1"), fast_retry(3));
        client.report(&sample_report()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_report_not_retried_on_protocol_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/api/v1/reports", post(rejecting_reports))
            .with_state(Arc::clone(&calls));
        let url = serve(router).await;

        let client = MasterClient::new(url, NodeId::new("w1"), fast_retry(3));
        let result = client.report(&sample_report()).await;
        assert!(matches!(result, Err(CrawlerError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_report_gives_up_after_bounded_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = MasterClient::new(format!("http://{}", addr), NodeId::new("w1"), fast_retry(2));
        let result = client.report(&sample_report()).await;
        assert!(matches!(result, Err(CrawlerError::Network(_))));

        // 后台上报同样在有限次数后结束
        let handle = Arc::new(client).report_detached(sample_report());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
