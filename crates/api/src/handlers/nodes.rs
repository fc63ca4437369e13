use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use crawler_domain::{Heartbeat, NodeId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 心跳请求体, 可以为空
#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub node_id: NodeId,
    pub outcome: crawler_dispatcher::HeartbeatOutcome,
}

/// 注册节点, 开始新的生命周期
pub async fn register_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registration = state.controller.register_node(&NodeId::new(id)).await?;
    Ok(success(registration))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = if body.is_empty() {
        HeartbeatRequest::default()
    } else {
        serde_json::from_slice::<HeartbeatRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("心跳请求体无效: {}", e)))?
    };

    let node_id = NodeId::new(id);
    let outcome = state
        .controller
        .heartbeat(Heartbeat {
            node_id: node_id.clone(),
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        })
        .await?;

    Ok(success(HeartbeatResponse { node_id, outcome }))
}

/// 取走节点的待处理分配
pub async fn poll_assignments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let assignments = state
        .controller
        .poll_assignments(&NodeId::new(id))
        .await?;
    Ok(success(assignments))
}

pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.nodes().await))
}
