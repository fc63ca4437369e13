use axum::{extract::rejection::JsonRejection, extract::State, response::IntoResponse, Json};
use crawler_domain::TaskReport;

use crate::{error::ApiResult, response::accepted, routes::AppState};

/// 接收任务结果上报
///
/// 只做格式校验后放入上报队列, 立即返回 202; 队列已满时返回 503,
/// 工作节点应稍后重试。
pub async fn submit_report(
    State(state): State<AppState>,
    payload: Result<Json<TaskReport>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(report) = payload?;
    state.controller.submit_report(report)?;
    Ok(accepted("上报已接收"))
}
