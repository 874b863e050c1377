use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::ServerMessage;

/// 下行队列长度。客户端停止读取时队列写满，
/// 之后的消息直接丢弃，不做无界积压。
pub const OUTBOUND_QUEUE_SIZE: usize = 32;

/// 注册表里的单条连接：写端队列加一个连接标识。
/// 连接本身归会话任务所有，这里只持有非拥有的发送引用。
#[derive(Debug, Clone)]
pub struct Connection {
    conn_id: Uuid,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// 序列化并投递一条下行消息。连接已断开或队列已满时
    /// 丢弃消息并返回 false。
    pub fn send_message(&self, msg: &ServerMessage) -> bool {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize server message: {}", e);
                return false;
            }
        };
        match self.tx.try_send(Message::Text(text.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 通知写端关闭底层通道，用于同一用户重连时顶掉旧连接。
    /// 队列写满说明客户端已停摆，写端随后会在socket错误时退出。
    pub fn close(&self) {
        let _ = self.tx.try_send(Message::Close(None));
    }
}

/// user_id 到活跃连接的并发安全映射。
/// 每个用户最多保留一条连接，register 返回被顶掉的旧连接。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Mutex<HashMap<i64, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Connection>> {
        self.conns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记连接，返回同一用户之前的连接（如果有）。
    pub fn register(&self, user_id: i64, conn: Connection) -> Option<Connection> {
        self.lock().insert(user_id, conn)
    }

    /// 只在注册表里仍是这条连接时才移除，
    /// 防止迟到的断开把同一用户的新连接清掉。
    pub fn unregister(&self, user_id: i64, conn_id: Uuid) -> bool {
        let mut conns = self.lock();
        match conns.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                conns.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// 向指定用户投递消息。用户不在线时直接丢弃并返回 false，
    /// 不做排队或补发。
    pub fn send(&self, user_id: i64, msg: &ServerMessage) -> bool {
        let conn = self.lock().get(&user_id).cloned();
        match conn {
            Some(conn) => conn.send_message(msg),
            None => false,
        }
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.lock().contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_conn() -> (Connection, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        (Connection::new(tx), rx)
    }

    #[test]
    fn register_returns_displaced_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = new_conn();
        let first_id = first.conn_id();
        let (second, _rx2) = new_conn();

        assert!(registry.register(1, first).is_none());
        let displaced = registry.register(1, second).unwrap();
        assert_eq!(displaced.conn_id(), first_id);
        assert!(registry.is_connected(1));
    }

    #[test]
    fn unregister_with_stale_id_is_noop() {
        let registry = ConnectionRegistry::new();
        let (old, _rx1) = new_conn();
        let old_id = old.conn_id();
        let (new, _rx2) = new_conn();
        let new_id = new.conn_id();

        registry.register(1, old);
        registry.register(1, new);

        // 旧连接迟到的注销不能清掉新连接
        assert!(!registry.unregister(1, old_id));
        assert!(registry.is_connected(1));

        assert!(registry.unregister(1, new_id));
        assert!(!registry.is_connected(1));
    }

    #[test]
    fn send_to_absent_user_returns_false() {
        let registry = ConnectionRegistry::new();
        let dropped = registry.send(
            42,
            &ServerMessage::Error {
                message: "ping".into(),
            },
        );
        assert!(!dropped);
    }

    #[test]
    fn send_delivers_serialized_message() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = new_conn();
        registry.register(1, conn);

        assert!(registry.send(
            1,
            &ServerMessage::Error {
                message: "hello".into(),
            },
        ));

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert!(text.as_str().contains("hello")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn close_pushes_close_frame() {
        let (conn, mut rx) = new_conn();
        conn.close();
        assert!(matches!(rx.try_recv().unwrap(), Message::Close(None)));
    }

    #[test]
    fn full_queue_drops_instead_of_buffering() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        let msg = ServerMessage::Error {
            message: "ping".into(),
        };

        assert!(conn.send_message(&msg));
        // 客户端不取走消息，第二条直接被丢弃
        assert!(!conn.send_message(&msg));

        assert!(matches!(rx.try_recv().unwrap(), Message::Text(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_registers_for_different_users_are_independent() {
        let registry = Arc::new(ConnectionRegistry::new());

        let mut handles = Vec::new();
        for user_id in 0..16i64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (conn, _rx) = {
                    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
                    (Connection::new(tx), rx)
                };
                registry.register(user_id, conn);
                registry.is_connected(user_id)
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        for user_id in 0..16i64 {
            assert!(registry.is_connected(user_id));
        }
    }
}
