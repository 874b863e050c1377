use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::AppState;
use crate::routes::geo::{GeoUpdate, UserPosition, friends_positions};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::{Connection, OUTBOUND_QUEUE_SIZE};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: i64,
}

#[axum::debug_handler]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(state, query.user_id, socket))
}

/// 收到的帧在协议层的归类。
#[derive(Debug)]
enum FrameAction<'a> {
    /// 文本帧，进入协议派发
    Dispatch(&'a str),
    /// 协议外的帧，回一条错误但保持连接
    Unsupported,
    /// Ping/Pong 由axum处理
    Ignore,
    /// 客户端要求关闭
    Close,
}

fn classify_frame(msg: &Message) -> FrameAction<'_> {
    match msg {
        Message::Text(text) => FrameAction::Dispatch(text.as_str()),
        Message::Binary(_) => FrameAction::Unsupported,
        Message::Close(_) => FrameAction::Close,
        _ => FrameAction::Ignore,
    }
}

/// 单条连接的会话循环：注册、收消息、派发、注销。
/// 所有失败只影响这一条连接。
async fn handle_session(state: AppState, user_id: i64, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_SIZE);

    let conn = Connection::new(tx);
    let conn_id = conn.conn_id();

    // 同一用户重复连接时顶掉旧连接
    if let Some(displaced) = state.registry.register(user_id, conn.clone()) {
        tracing::info!("User {} reconnected, closing previous channel", user_id);
        displaced.close();
    }
    tracing::info!("User {} connected", user_id);

    // 写端任务：把下行队列搬运到socket，收到Close帧后结束
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    // 读循环：同一连接上的消息严格串行处理
    while let Some(Ok(msg)) = stream.next().await {
        match classify_frame(&msg) {
            FrameAction::Dispatch(text) => {
                if let Some(reply) = dispatch(&state, user_id, text).await {
                    if !conn.send_message(&reply) {
                        break;
                    }
                }
            }
            FrameAction::Unsupported => {
                let reply = ServerMessage::Error {
                    message: "协议不支持二进制帧".to_string(),
                };
                if !conn.send_message(&reply) {
                    break;
                }
            }
            FrameAction::Close => break,
            FrameAction::Ignore => {}
        }
    }

    // 如果已被新连接顶掉，这里是空操作
    state.registry.unregister(user_id, conn_id);
    writer.abort();
    tracing::info!("User {} disconnected", user_id);
}

/// 解析并派发一条上行消息，返回需要回写的下行消息。
pub async fn dispatch(state: &AppState, user_id: i64, text: &str) -> Option<ServerMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("User {} sent malformed message: {}", user_id, e);
            return Some(ServerMessage::Error {
                message: "无法识别的消息格式".to_string(),
            });
        }
    };

    match msg {
        ClientMessage::UpdateGeo {
            latitude,
            longitude,
        } => {
            let geo = GeoUpdate {
                latitude,
                longitude,
            };
            // 成功时不回包，失败通过同一连接报告
            match UserPosition::upsert(&state.pool, user_id, &geo).await {
                Ok(_) => None,
                Err(e) => Some(ServerMessage::Error {
                    message: e.message(),
                }),
            }
        }
        ClientMessage::GetUserGeos { user_ids } => {
            match UserPosition::get_many(&state.pool, &user_ids).await {
                Ok(user_geos) => Some(ServerMessage::UserGeos { user_geos }),
                Err(e) => Some(ServerMessage::Error {
                    message: e.message(),
                }),
            }
        }
        ClientMessage::GetNearby {
            latitude,
            longitude,
            radius,
            limit,
        } => {
            let radius = radius
                .unwrap_or(1000.0)
                .min(state.config.max_search_radius);
            let limit = limit.unwrap_or(20).min(50);

            match UserPosition::nearest(&state.pool, latitude, longitude, radius, limit, user_id)
                .await
            {
                Ok(nearby_users) => Some(ServerMessage::NearbyUsers { nearby_users }),
                Err(e) => Some(ServerMessage::Error {
                    message: e.message(),
                }),
            }
        }
        ClientMessage::GetFriendsGeos { token } => {
            match friends_positions(
                &state.pool,
                &state.http,
                &state.config.user_service_url,
                &token,
            )
            .await
            {
                Ok(user_geos) => Some(ServerMessage::UserGeos { user_geos }),
                // 上游失败只让这一次查询失败，连接保持可用
                Err(e) => Some(ServerMessage::Error {
                    message: e.message(),
                }),
            }
        }
    }
}
