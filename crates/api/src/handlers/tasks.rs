use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use crawler_dispatcher::RecrawlOutcome;
use crawler_domain::{TaskId, TaskSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// 批量加入种子URL
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecrawlRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RecrawlResponse {
    pub task_id: TaskId,
    pub outcome: RecrawlOutcome,
}

pub async fn enqueue_tasks(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    if request.urls.is_empty() {
        return Err(ApiError::BadRequest("urls 不能为空".to_string()));
    }

    let summary = state
        .controller
        .enqueue_urls(&request.urls, TaskSource::Seed)
        .await;
    Ok(created(summary))
}

/// 显式重新爬取: 已完成或已死亡的任务回到等待队列
pub async fn recrawl(
    State(state): State<AppState>,
    payload: Result<Json<RecrawlRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let (task_id, outcome) = state.controller.recrawl(&request.url).await?;
    Ok(success(RecrawlResponse { task_id, outcome }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.task(&id).await?))
}
