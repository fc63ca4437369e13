use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crawler_core::CrawlerError;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("主节点错误: {0}")]
    Crawler(#[from] CrawlerError),

    #[error("请求体无法解析: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Crawler(err) => match err {
                CrawlerError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                CrawlerError::NodeNotFound { .. } => (StatusCode::NOT_FOUND, "NODE_NOT_FOUND"),
                CrawlerError::ContentNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "CONTENT_NOT_FOUND")
                }
                CrawlerError::NodeFailed { .. } => (StatusCode::CONFLICT, "NODE_FAILED"),
                CrawlerError::NotTaskOwner { .. } | CrawlerError::InvalidTaskState { .. } => {
                    (StatusCode::CONFLICT, "CONFLICT")
                }
                CrawlerError::Protocol(_) => (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR"),
                CrawlerError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "INVALID_URL"),
                CrawlerError::Serialization(_) => {
                    (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
                }
                CrawlerError::ResourceExhausted(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_EXHAUSTED")
                }
                CrawlerError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::InvalidBody(_) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn suggestions(&self) -> Vec<&'static str> {
        match self {
            ApiError::Crawler(CrawlerError::NodeFailed { .. }) => {
                vec!["节点已被判定失效, 请调用 POST /api/v1/nodes/{id}/register 重新注册"]
            }
            ApiError::Crawler(CrawlerError::ResourceExhausted(_)) => {
                vec!["主节点上报队列已满, 请稍后重试"]
            }
            ApiError::InvalidBody(_) => vec!["请检查JSON格式以及必需字段"],
            _ => Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        } else {
            warn!("请求被拒绝: {}", self);
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": self.suggestions(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_error_conversion() {
        let api_error: ApiError = CrawlerError::task_not_found("abc").into();
        match api_error {
            ApiError::Crawler(CrawlerError::TaskNotFound { id }) => assert_eq!(id, "abc"),
            _ => panic!("Expected CrawlerError::TaskNotFound"),
        }
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (CrawlerError::task_not_found("x"), StatusCode::NOT_FOUND),
            (
                CrawlerError::NodeFailed {
                    id: "n1".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (CrawlerError::protocol("bad"), StatusCode::BAD_REQUEST),
            (
                CrawlerError::InvalidUrl("ftp://x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CrawlerError::ResourceExhausted("full".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CrawlerError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bad_request() {
        let response = ApiError::BadRequest("urls 不能为空".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_display() {
        let error = ApiError::Internal("Test error".to_string());
        assert_eq!(error.to_string(), "内部服务器错误: Test error");
    }
}
