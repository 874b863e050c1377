//! 需要真实 Postgres 的存储层与会话派发测试。
//! 设置 DATABASE_URL 后执行 `cargo test -- --ignored` 运行。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use geotrack_backend::{
    AppState,
    config::Config,
    routes::geo::{GeoUpdate, UserPosition, ensure_schema},
    routes::ws::{ConnectionRegistry, ServerMessage, dispatch},
};

static NEXT_ID: AtomicI64 = AtomicI64::new(0);

/// 每次调用返回一个不会和历史数据撞车的用户ID。
fn unique_id() -> i64 {
    let base = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_micros() as i64;
    base.wrapping_mul(1000) + NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("Failed to connect to Postgres");
    ensure_schema(&pool).await.expect("Failed to ensure schema");
    pool
}

fn test_state(pool: PgPool) -> AppState {
    let config = Config {
        database_url: String::new(),
        redis_url: "redis://localhost:6379".into(),
        jwt_secret: "test-secret".into(),
        user_service_url: "http://localhost:9".into(),
        api_base_uri: "/api/v1".into(),
        rate_limit_window_secs: 60,
        rate_limit_requests: 100,
        server_host: "127.0.0.1".into(),
        server_port: 0,
        max_search_radius: 5000.0,
    };
    AppState {
        pool,
        config,
        http: reqwest::Client::new(),
        registry: Arc::new(ConnectionRegistry::new()),
    }
}

#[tokio::test]
#[ignore = "需要 DATABASE_URL 指向可用的 Postgres"]
async fn upsert_then_get_many_returns_latest_coordinate() {
    let pool = test_pool().await;
    let user_id = unique_id();

    let first = UserPosition::upsert(
        &pool,
        user_id,
        &GeoUpdate {
            latitude: 55.75,
            longitude: 37.61,
        },
    )
    .await
    .unwrap();

    let positions = UserPosition::get_many(&pool, &[user_id]).await.unwrap();
    let stored = positions.get(&user_id).expect("row must exist after upsert");
    assert_eq!(stored.latitude, 55.75);
    assert_eq!(stored.longitude, 37.61);

    // 覆盖写入后读到新坐标，updated_at 单调不减
    let second = UserPosition::upsert(
        &pool,
        user_id,
        &GeoUpdate {
            latitude: 59.94,
            longitude: 30.31,
        },
    )
    .await
    .unwrap();
    assert!(second.updated_at >= first.updated_at);

    let positions = UserPosition::get_many(&pool, &[user_id]).await.unwrap();
    let stored = positions.get(&user_id).unwrap();
    assert_eq!(stored.latitude, 59.94);
    assert_eq!(stored.longitude, 30.31);
}

#[tokio::test]
#[ignore = "需要 DATABASE_URL 指向可用的 Postgres"]
async fn repeated_upsert_keeps_single_row_per_user() {
    let pool = test_pool().await;
    let user_id = unique_id();
    let geo = GeoUpdate {
        latitude: 1.5,
        longitude: 2.5,
    };

    let first = UserPosition::upsert(&pool, user_id, &geo).await.unwrap();
    let second = UserPosition::upsert(&pool, user_id, &geo).await.unwrap();

    // 相同输入重复写入，除时间戳外行内容不变
    assert_eq!(second.user_id, first.user_id);
    assert_eq!(second.latitude, first.latitude);
    assert_eq!(second.longitude, first.longitude);

    let positions = UserPosition::get_many(&pool, &[user_id]).await.unwrap();
    assert_eq!(positions.len(), 1);
}

#[tokio::test]
#[ignore = "需要 DATABASE_URL 指向可用的 Postgres"]
async fn get_many_for_unknown_user_is_empty() {
    let pool = test_pool().await;

    // 从未上报过位置的用户不算错误，结果里直接没有
    let positions = UserPosition::get_many(&pool, &[unique_id()]).await.unwrap();
    assert!(positions.is_empty());
}

#[tokio::test]
#[ignore = "需要 DATABASE_URL 指向可用的 Postgres"]
async fn live_update_then_query_roundtrip() {
    let pool = test_pool().await;
    let state = test_state(pool);
    let sender = unique_id();
    let reader = unique_id();

    // 用户A上报位置，成功时不回包
    let reply = dispatch(
        &state,
        sender,
        r#"{"action":"update_geo","latitude":55.75,"longitude":37.61}"#,
    )
    .await;
    assert!(reply.is_none());

    // 用户B查询A的位置，收到 user_geos 回包
    let query = format!(r#"{{"action":"get_user_geos","user_ids":[{}]}}"#, sender);
    match dispatch(&state, reader, &query).await {
        Some(ServerMessage::UserGeos { user_geos }) => {
            let stored = user_geos.get(&sender).expect("sender position must be visible");
            assert_eq!(stored.latitude, 55.75);
            assert_eq!(stored.longitude, 37.61);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
#[ignore = "需要 DATABASE_URL 指向可用的 Postgres"]
async fn nearest_finds_neighbor_across_antimeridian() {
    let pool = test_pool().await;
    let neighbor = unique_id();

    UserPosition::upsert(
        &pool,
        neighbor,
        &GeoUpdate {
            latitude: 0.0,
            longitude: 179.99,
        },
    )
    .await
    .unwrap();

    // 圆心在另一侧半球，相隔约2.2公里
    let nearby = UserPosition::nearest(&pool, 0.0, -179.99, 10_000.0, 10_000, unique_id())
        .await
        .unwrap();

    let found = nearby.iter().find(|p| p.user_id == neighbor);
    let found = found.expect("neighbor across the seam must be returned");
    assert!(found.distance <= 10_000.0);
}
