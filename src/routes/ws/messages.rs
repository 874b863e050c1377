use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::routes::geo::{NearbyPosition, UserPosition};

/// 长连接上行消息。按 action 字段区分，未知的 action
/// 会在反序列化时失败，由会话层回一条错误消息。
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 上报自己的最新位置，成功时不回包
    UpdateGeo { latitude: f64, longitude: f64 },
    /// 查询指定用户的位置
    GetUserGeos { user_ids: Vec<i64> },
    /// 查询附近的用户
    GetNearby {
        latitude: f64,
        longitude: f64,
        radius: Option<f64>,
        limit: Option<i64>,
    },
    /// 查询好友位置，凭证随消息携带
    GetFriendsGeos { token: String },
}

/// 长连接下行消息。
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    UserGeos {
        user_geos: HashMap<i64, UserPosition>,
    },
    NearbyUsers {
        nearby_users: Vec<NearbyPosition>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_update_geo() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"update_geo","latitude":55.75,"longitude":37.61}"#)
                .unwrap();
        match msg {
            ClientMessage::UpdateGeo {
                latitude,
                longitude,
            } => {
                assert_eq!(latitude, 55.75);
                assert_eq!(longitude, 37.61);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn parses_get_user_geos() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"get_user_geos","user_ids":[1,2,3]}"#).unwrap();
        match msg {
            ClientMessage::GetUserGeos { user_ids } => assert_eq!(user_ids, vec![1, 2, 3]),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn parses_get_nearby_with_optional_fields() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"action":"get_nearby","latitude":0.0,"longitude":0.0}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::GetNearby { radius, limit, .. } => {
                assert!(radius.is_none());
                assert!(limit.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"action":"dance"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"action":"update_geo"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn user_geos_reply_uses_flat_key() {
        let mut map = HashMap::new();
        map.insert(
            1,
            UserPosition {
                user_id: 1,
                latitude: 55.75,
                longitude: 37.61,
                updated_at: Utc::now(),
            },
        );
        let json = serde_json::to_value(ServerMessage::UserGeos { user_geos: map }).unwrap();

        assert!(json.get("user_geos").is_some());
        assert_eq!(json["user_geos"]["1"]["latitude"], 55.75);
    }

    #[test]
    fn error_reply_is_plain_message_object() {
        let json = serde_json::to_value(ServerMessage::Error {
            message: "bad".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"message": "bad"}));
    }
}
