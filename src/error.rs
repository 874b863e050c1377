use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::utils::{error_codes, error_to_api_response};

/// 服务内部统一的错误类型。
///
/// 所有错误都只影响触发它的单个请求或单条连接，
/// 不会导致服务停止处理其他连接。
#[derive(Debug)]
pub enum AppError {
    /// 坐标超出范围或请求格式非法
    Validation(String),
    /// 凭证格式错误或签名无效
    InvalidCredential,
    /// 凭证已过期
    ExpiredCredential,
    /// 用户服务拒绝了凭证
    UpstreamUnauthorized,
    /// 用户服务不可达或返回了非预期状态
    UpstreamUnavailable(String),
    /// 请求的数据不存在
    NotFound(String),
    /// 存储层错误
    Database(sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredential | AppError::ExpiredCredential => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnauthorized => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::InvalidCredential | AppError::ExpiredCredential => error_codes::AUTH_FAILED,
            AppError::UpstreamUnauthorized => error_codes::AUTH_FAILED,
            AppError::UpstreamUnavailable(_) => error_codes::UPSTREAM_ERROR,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Database(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::InvalidCredential => "无效的凭证".to_string(),
            AppError::ExpiredCredential => "凭证已过期".to_string(),
            AppError::UpstreamUnauthorized => "用户服务拒绝了凭证".to_string(),
            AppError::UpstreamUnavailable(msg) => format!("用户服务不可用: {}", msg),
            AppError::NotFound(msg) => msg.clone(),
            // 不向客户端透露数据库细节
            AppError::Database(_) => "内部服务器错误".to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "database error: {}", e),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Database(ref e) = self {
            tracing::error!("Database error: {}", e);
        }
        let body = error_to_api_response::<()>(self.error_code(), self.message());
        (self.status_code(), body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredCredential,
            _ => AppError::InvalidCredential,
        }
    }
}
