use reqwest::StatusCode;

use crate::error::AppError;

/// 获取调用者的好友ID列表。
///
/// 凭证原样转发给用户服务，由远端完成鉴权。
/// 本客户端不做重试，单次请求失败即返回错误，由调用方决定重试策略。
pub async fn friend_ids(
    http: &reqwest::Client,
    user_service_url: &str,
    token: &str,
) -> Result<Vec<i64>, AppError> {
    let url = format!("{}/api/v1/friends/friendsList", user_service_url);

    let response = http
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

    if let Some(err) = map_upstream_status(response.status()) {
        return Err(err);
    }

    response
        .json::<Vec<i64>>()
        .await
        .map_err(|e| AppError::UpstreamUnavailable(format!("非法的响应格式: {}", e)))
}

/// 把用户服务的响应状态映射到错误分类：
/// 401 视为凭证被拒绝，其余非 2xx 一律视为服务不可用。
fn map_upstream_status(status: StatusCode) -> Option<AppError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED {
        Some(AppError::UpstreamUnauthorized)
    } else {
        Some(AppError::UpstreamUnavailable(format!(
            "上游返回状态 {}",
            status
        )))
    }
}
