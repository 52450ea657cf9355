/*!
 * 错误处理模块
 *
 * 定义了应用程序中所有可能出现的错误类型，并提供统一的错误处理机制。
 * 客户端错误（请求体为空、JSON 格式错误、结构不匹配）直接映射为 4xx 响应；
 * 其余错误统一标记为未处理错误，由路由层的中间件包装成通用错误信封。
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// 应用程序结果类型的别名
pub type AppResult<T> = Result<T, AppError>;

/// 单个字段的校验失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// 以点号分隔的字段路径，例如 `header.event_id`
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 某个候选请求结构的解码失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantMismatch {
    pub variant: &'static str,
    pub errors: Vec<FieldError>,
}

/// 附加在 500 响应上的扩展，携带原始错误文本
///
/// 路由层中间件看到它之后会重写响应体，补充请求路径
#[derive(Debug, Clone)]
pub struct UnhandledError(pub String);

/// 应用程序错误枚举
#[derive(Error, Debug)]
pub enum AppError {
    /// 请求体为空
    #[error("Request body is empty")]
    EmptyBody,

    /// 请求体不是合法的 JSON
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// 请求体是合法 JSON，但不匹配任何已知的 Webhook 结构
    #[error("Request body matches no known webhook shape")]
    SchemaMismatch(Vec<VariantMismatch>),

    /// 数据库操作错误
    /// 包括连接失败、建表失败、事务失败等
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Coze API 调用错误
    #[error("Coze API error: {0}")]
    Coze(String),

    /// HTTP 客户端错误
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// JSON 序列化错误
    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    /// 配置错误
    /// 环境变量格式错误等
    #[error("Configuration error: {0}")]
    Config(String),

    /// 生命周期错误
    /// 例如重复启动、在未启动时访问数据库
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// 内部服务器错误
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 机器可读的错误代码，出现在客户端错误响应的 `error` 字段中
    pub fn code(&self) -> &'static str {
        match self {
            AppError::EmptyBody => "invalid_request_body",
            AppError::InvalidJson(_) => "invalid_json",
            AppError::SchemaMismatch(_) => "validation_error",
            AppError::Coze(_) => "external_service_error",
            _ => "internal_server_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, body) = match &self {
            AppError::EmptyBody => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": "请求体不能为空", "error": code }),
            ),
            AppError::InvalidJson(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": "无效的 JSON 格式", "error": code }),
            ),
            AppError::SchemaMismatch(attempts) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "success": false,
                    "message": "请求体不匹配任何已知的 Webhook 结构",
                    "error": code,
                    "detail": attempts,
                }),
            ),
            AppError::Coze(message) => (
                StatusCode::BAD_GATEWAY,
                json!({ "success": false, "message": message, "error": code }),
            ),
            _ => {
                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "error": "服务器内部错误" })),
                )
                    .into_response();
                response
                    .extensions_mut()
                    .insert(UnhandledError(self.to_string()));
                return response;
            }
        };

        (status, Json(body)).into_response()
    }
}
