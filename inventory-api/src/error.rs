//! HTTP 层错误映射
//!
//! 把 [`ServiceError`] 映射为一致的 JSON 错误响应：
//! `{ "error": <消息>, "code": <错误码> }`。
//!
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory_service::error::ServiceError;
use serde_json::json;

/// HTTP 处理器的错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// 处理器返回值别名
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Service(service) = self;
        let (status, code, message) = match &service {
            ServiceError::NotFound { id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("person with id {id} not found"),
            ),
            ServiceError::InvalidEntity { reason } => {
                (StatusCode::BAD_REQUEST, "INVALID_ENTITY", reason.clone())
            }
            // 存储已提交但发布失败：对调用方呈现为 500（既有不一致的出口）
            ServiceError::Publish { source } => {
                tracing::error!(error = %source, "audit publish failed after committed write");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AUDIT_PUBLISH_FAILED",
                    "write committed but audit publish failed".to_string(),
                )
            }
            other => {
                tracing::error!(error = %other, "unexpected service error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
