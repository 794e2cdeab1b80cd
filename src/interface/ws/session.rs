//! WebSocket 会话接入
//!
//! 握手流程：升级后客户端必须在限时内发出首帧 `{token, ws_key?}`，
//! 鉴权通过才注册进连接管理器；失败以 1008 策略码关闭，绝不注册。
//! 注册后每条连接由独立任务串行读帧。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{self, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::TerminalKey;
use crate::error::{GatewayError, Result};
use crate::infrastructure::auth::TokenVerifier;
use crate::interface::ws::frame::{AuthRequest, WsFrame};
use crate::interface::ws::manager::{CONTROL_WRITE_DEADLINE, Connection, WsManager};

/// 路由共享状态
#[derive(Clone)]
pub struct WsState {
    pub manager: Arc<WsManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub auth_timeout: Duration,
}

/// 一条 WebSocket 连接的写半边
struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Session(format!("ws write: {e}")))
    }

    async fn ping(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| GatewayError::Session(format!("ws ping: {e}")))
    }
}

pub async fn ws_handler(State(state): State<WsState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: WsState, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let conn = Arc::new(WsConnection {
        sink: Mutex::new(sink),
    });

    // 首帧鉴权，超时/非法/验签失败都在注册前关闭
    let key = match authenticate(&state, &mut stream).await {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "websocket handshake rejected");
            let close = Message::Close(Some(CloseFrame {
                code: ws::close_code::POLICY,
                reason: "auth failed".into(),
            }));
            let mut sink = conn.sink.lock().await;
            let _ = sink.send(close).await;
            return;
        }
    };

    state
        .manager
        .set_connection(key.clone(), Arc::clone(&conn) as Arc<dyn Connection>)
        .await;
    if let Err(e) = conn.send(WsFrame::auth(&key.to_string()).to_text()).await {
        warn!(terminal = %key, error = %e, "auth ack failed");
        state.manager.remove_connection(&key).await;
        return;
    }

    read_loop(&state, &key, conn, &mut stream).await;
    state.manager.remove_connection(&key).await;
}

async fn authenticate(
    state: &WsState,
    stream: &mut SplitStream<WebSocket>,
) -> Result<TerminalKey> {
    let first = timeout(state.auth_timeout, stream.next())
        .await
        .map_err(|_| GatewayError::Session("auth frame timeout".into()))?
        .ok_or_else(|| GatewayError::Session("closed before auth".into()))?
        .map_err(|e| GatewayError::Session(format!("ws read: {e}")))?;

    let text = match first {
        Message::Text(text) => text,
        other => {
            return Err(GatewayError::Session(format!(
                "unexpected first frame: {other:?}"
            )));
        }
    };
    let req: AuthRequest = serde_json::from_str(text.as_str())
        .map_err(|e| GatewayError::Session(format!("malformed auth frame: {e}")))?;
    let user_id = state.verifier.verify(&req.token)?;

    Ok(resolve_terminal_key(user_id, req.ws_key.as_deref()))
}

/// 重连时允许复用旧终端标识，但只在标识属于同一用户时生效，
/// 防止拿别人的 ws_key 顶替会话。
fn resolve_terminal_key(user_id: u64, ws_key: Option<&str>) -> TerminalKey {
    if let Some(raw) = ws_key {
        if let Ok(key) = raw.parse::<TerminalKey>() {
            if key.user_id == user_id {
                return key;
            }
        }
        debug!(user_id, ws_key = raw, "stale terminal key ignored");
    }
    let token: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    TerminalKey::new(user_id, token)
}

async fn read_loop(
    state: &WsState,
    key: &TerminalKey,
    conn: Arc<WsConnection>,
    stream: &mut SplitStream<WebSocket>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(terminal = %key, error = %e, "websocket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let frame: WsFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(terminal = %key, error = %e, "malformed client frame dropped");
                        continue;
                    }
                };
                if frame.kind == "ping" {
                    // 应答同样带短写期限，堵住的连接直接判死
                    let reply = conn.send(WsFrame::pong().to_text());
                    match timeout(CONTROL_WRITE_DEADLINE, reply).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                } else {
                    debug!(terminal = %key, kind = %frame.kind, "unsupported client frame ignored");
                }
            }
            Message::Close(_) => {
                info!(terminal = %key, "client closed websocket");
                break;
            }
            // axum 已自动回应 Ping，Pong/Binary 直接忽略
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_key_reused_for_same_user() {
        let key = resolve_terminal_key(7, Some("7:ab12cd34"));
        assert_eq!(key, TerminalKey::new(7, "ab12cd34"));
    }

    #[test]
    fn test_terminal_key_minted_for_other_users_key() {
        let key = resolve_terminal_key(7, Some("8:ab12cd34"));
        assert_eq!(key.user_id, 7);
        assert_ne!(key.token, "ab12cd34");
        assert_eq!(key.token.len(), 8);
    }

    #[test]
    fn test_terminal_key_minted_when_absent_or_garbage() {
        let fresh = resolve_terminal_key(3, None);
        assert_eq!(fresh.user_id, 3);
        assert_eq!(fresh.token.len(), 8);

        let garbled = resolve_terminal_key(3, Some("not-a-key"));
        assert_eq!(garbled.user_id, 3);
        assert_eq!(garbled.token.len(), 8);
    }
}
