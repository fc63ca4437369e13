use axum::{extract::State, response::IntoResponse};

use crate::{error::ApiResult, response::success, routes::AppState};

/// 最近一次调度周期发布的监控快照
pub async fn get_snapshot(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.snapshot()))
}

pub async fn get_outbox_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.outbox_stats().await))
}
