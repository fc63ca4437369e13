use axum::{
    routing::{get, post},
    Router,
};
use crawler_dispatcher::MasterController;

use crate::handlers::{
    health::health_check,
    monitoring::{get_outbox_stats, get_snapshot},
    nodes::{heartbeat, list_nodes, poll_assignments, register_node},
    reports::submit_report,
    tasks::{enqueue_tasks, get_task, recrawl},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub controller: MasterController,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 节点协议
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/{id}/register", post(register_node))
        .route("/api/v1/nodes/{id}/heartbeat", post(heartbeat))
        .route("/api/v1/nodes/{id}/assignments", get(poll_assignments))
        .route("/api/v1/reports", post(submit_report))
        // 任务管理
        .route("/api/v1/tasks", post(enqueue_tasks))
        .route("/api/v1/tasks/recrawl", post(recrawl))
        .route("/api/v1/tasks/{id}", get(get_task))
        // 监控
        .route("/api/v1/monitoring/snapshot", get(get_snapshot))
        .route("/api/v1/monitoring/outbox", get(get_outbox_stats))
        .with_state(state)
}
