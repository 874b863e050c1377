use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::clients;
use crate::error::AppError;
use crate::utils::{calculate_distance, validate_coordinate};

/// 每个用户一行，只保留最近一次上报的位置。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPosition {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GeoUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct NearbyPosition {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
    pub updated_at: DateTime<Utc>,
}

/// 启动时建表，对应原服务在 lifespan 里的 create_all。
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_positions (
            user_id BIGINT PRIMARY KEY,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 范围预筛选用的复合索引
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_user_positions_lat_lon
        ON user_positions (latitude, longitude)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl UserPosition {
    /// 写入用户最新位置，已存在则原地覆盖（last-write-wins）。
    pub async fn upsert(
        pool: &PgPool,
        user_id: i64,
        geo: &GeoUpdate,
    ) -> Result<Self, AppError> {
        validate_coordinate(geo.latitude, geo.longitude)?;

        let position = sqlx::query_as::<_, UserPosition>(
            r#"
            INSERT INTO user_positions (user_id, latitude, longitude, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
                SET latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    updated_at = NOW()
            RETURNING user_id, latitude, longitude, updated_at
            "#,
        )
        .bind(user_id)
        .bind(geo.latitude)
        .bind(geo.longitude)
        .fetch_one(pool)
        .await?;

        Ok(position)
    }

    /// 批量查询位置。不存在的ID直接略过，不算错误。
    pub async fn get_many(
        pool: &PgPool,
        user_ids: &[i64],
    ) -> Result<HashMap<i64, Self>, AppError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let positions = sqlx::query_as::<_, UserPosition>(
            r#"
            SELECT user_id, latitude, longitude, updated_at
            FROM user_positions
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(pool)
        .await?;

        Ok(positions.into_iter().map(|p| (p.user_id, p)).collect())
    }

    /// 以给定坐标为圆心做邻近查询。
    ///
    /// 先用经纬度范围在数据库里粗筛，再在内存中按球面距离
    /// 精确过滤和排序，距离相同时按 user_id 升序。
    pub async fn nearest(
        pool: &PgPool,
        latitude: f64,
        longitude: f64,
        max_distance: f64,
        limit: i64,
        exclude: i64,
    ) -> Result<Vec<NearbyPosition>, AppError> {
        validate_coordinate(latitude, longitude)?;

        // 1度纬度约111km；经度随纬度收缩，极区附近收紧下限避免除零
        let lat_range = max_distance / 111_000.0;
        let cos_lat = latitude.to_radians().cos().abs().max(1e-6);
        let lon_range = max_distance / (111_000.0 * cos_lat);

        let candidates = match lon_bounds(longitude, lon_range) {
            LonBounds::All => {
                sqlx::query_as::<_, UserPosition>(
                    r#"
                    SELECT user_id, latitude, longitude, updated_at
                    FROM user_positions
                    WHERE latitude BETWEEN ($1 - $2::float8) AND ($1 + $2::float8)
                      AND user_id <> $3
                    "#,
                )
                .bind(latitude)
                .bind(lat_range)
                .bind(exclude)
                .fetch_all(pool)
                .await?
            }
            LonBounds::Range(low, high) => {
                sqlx::query_as::<_, UserPosition>(
                    r#"
                    SELECT user_id, latitude, longitude, updated_at
                    FROM user_positions
                    WHERE latitude BETWEEN ($1 - $2::float8) AND ($1 + $2::float8)
                      AND longitude BETWEEN $4 AND $5
                      AND user_id <> $3
                    "#,
                )
                .bind(latitude)
                .bind(lat_range)
                .bind(exclude)
                .bind(low)
                .bind(high)
                .fetch_all(pool)
                .await?
            }
            // 区间跨过±180°经线，拆成首尾两段
            LonBounds::Wrapped(from, to) => {
                sqlx::query_as::<_, UserPosition>(
                    r#"
                    SELECT user_id, latitude, longitude, updated_at
                    FROM user_positions
                    WHERE latitude BETWEEN ($1 - $2::float8) AND ($1 + $2::float8)
                      AND (longitude >= $4 OR longitude <= $5)
                      AND user_id <> $3
                    "#,
                )
                .bind(latitude)
                .bind(lat_range)
                .bind(exclude)
                .bind(from)
                .bind(to)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rank_by_distance(
            latitude,
            longitude,
            candidates,
            max_distance,
            limit,
            exclude,
        ))
    }
}

/// 经度粗筛窗口。纬度是有界的，经度在±180°处回绕，
/// 所以窗口可能是普通区间、跨经线的两段，或者覆盖整圈。
#[derive(Debug, PartialEq)]
enum LonBounds {
    /// 半径覆盖所有经度，不做经度过滤
    All,
    /// [low, high] 普通区间
    Range(f64, f64),
    /// 跨越±180°：longitude >= from 或 longitude <= to
    Wrapped(f64, f64),
}

impl LonBounds {
    #[cfg(test)]
    fn contains(&self, lon: f64) -> bool {
        match *self {
            LonBounds::All => true,
            LonBounds::Range(low, high) => (low..=high).contains(&lon),
            LonBounds::Wrapped(from, to) => lon >= from || lon <= to,
        }
    }
}

fn lon_bounds(longitude: f64, lon_range: f64) -> LonBounds {
    if lon_range >= 180.0 {
        return LonBounds::All;
    }
    let low = longitude - lon_range;
    let high = longitude + lon_range;
    if low < -180.0 {
        LonBounds::Wrapped(low + 360.0, high)
    } else if high > 180.0 {
        LonBounds::Wrapped(low, high - 360.0)
    } else {
        LonBounds::Range(low, high)
    }
}

/// 邻近排序的纯计算部分：过滤半径、排除指定用户、
/// 按（距离, user_id）升序、截断到 limit。
fn rank_by_distance(
    latitude: f64,
    longitude: f64,
    candidates: Vec<UserPosition>,
    max_distance: f64,
    limit: i64,
    exclude: i64,
) -> Vec<NearbyPosition> {
    let mut ranked: Vec<NearbyPosition> = candidates
        .into_iter()
        .filter(|p| p.user_id != exclude)
        .map(|p| {
            let distance = calculate_distance(latitude, longitude, p.latitude, p.longitude);
            NearbyPosition {
                user_id: p.user_id,
                latitude: p.latitude,
                longitude: p.longitude,
                distance,
                updated_at: p.updated_at,
            }
        })
        .filter(|p| p.distance <= max_distance)
        .collect();

    ranked.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.user_id.cmp(&b.user_id))
    });
    ranked.truncate(limit.max(0) as usize);
    ranked
}

/// 好友位置查询的两段流水线：先向用户服务换取好友ID，
/// 再批量读取位置。HTTP 接口和长连接走的是同一条路径。
pub async fn friends_positions(
    pool: &PgPool,
    http: &reqwest::Client,
    user_service_url: &str,
    token: &str,
) -> Result<HashMap<i64, UserPosition>, AppError> {
    let friend_ids = clients::friend_ids(http, user_service_url, token).await?;
    UserPosition::get_many(pool, &friend_ids).await
}
