use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{GeoUpdate, UserPosition, friends_positions};

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserIdsRequest {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: Option<f64>,
    pub limit: Option<i64>,
}

#[axum::debug_handler]
pub async fn update_user_geo(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
    Json(req): Json<GeoUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let position = UserPosition::upsert(&state.pool, query.user_id, &req).await?;
    Ok((StatusCode::OK, success_to_api_response(position)))
}

#[axum::debug_handler]
pub async fn read_users_geo(
    State(state): State<AppState>,
    Json(req): Json<UserIdsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.user_ids.is_empty() {
        return Err(AppError::Validation("user_ids 不能为空".to_string()));
    }

    let positions = UserPosition::get_many(&state.pool, &req.user_ids).await?;
    if positions.is_empty() {
        return Err(AppError::NotFound(
            "指定的用户都没有位置数据".to_string(),
        ));
    }

    // 按 user_id 升序返回，保证结果可复现
    let mut positions: Vec<UserPosition> = positions.into_values().collect();
    positions.sort_by_key(|p| p.user_id);

    Ok((StatusCode::OK, success_to_api_response(positions)))
}

#[axum::debug_handler]
pub async fn nearby_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let radius = query
        .radius
        .unwrap_or(1000.0)
        .min(state.config.max_search_radius);
    let limit = query.limit.unwrap_or(20).min(50); // 最多返回50条记录

    let nearby = UserPosition::nearest(
        &state.pool,
        query.latitude,
        query.longitude,
        radius,
        limit,
        claims.sub,
    )
    .await?;

    Ok((StatusCode::OK, success_to_api_response(nearby)))
}

#[axum::debug_handler]
pub async fn friends_geo(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
) -> Result<impl IntoResponse, AppError> {
    // 凭证原样转发给用户服务做好友关系解析
    let positions = friends_positions(
        &state.pool,
        &state.http,
        &state.config.user_service_url,
        bearer.token(),
    )
    .await?;

    let mut positions: Vec<UserPosition> = positions.into_values().collect();
    positions.sort_by_key(|p| p.user_id);

    Ok((StatusCode::OK, success_to_api_response(positions)))
}
