//! # Crawler API
//!
//! 主节点的 HTTP 接口, 工作节点通过它注册、心跳、拉取分配并上报结果,
//! 运维方通过它加入种子URL、查看任务和监控快照。
//!
//! 所有成功响应使用统一的 [`response::ApiResponse`] 包装:
//!
//! ```json
//! { "success": true, "data": { ... }, "message": null, "timestamp": "..." }
//! ```
//!
//! 错误响应由 [`error::ApiError`] 生成, `error.type` 字段给出机器可读的分类:
//!
//! | 状态码 | 场景 |
//! |---|---|
//! | 400 | 请求体无法解析、URL 无效、上报格式错误 |
//! | 404 | 任务不存在 |
//! | 409 | 节点已被判定失效, 需要重新注册 |
//! | 503 | 上报队列已满 |

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use crawler_core::ApiConfig;
use crawler_dispatcher::MasterController;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(controller: MasterController, api_config: &ApiConfig) -> Router {
    let state = AppState { controller };
    let router = create_routes(state);

    let router = if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    };

    router.layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
