//! 连接管理器
//!
//! 终端连接表 + 用户索引。两张表永远在同一把写锁内一起变更，
//! 保证任一时刻索引都能找到对应连接。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::models::TerminalKey;
use crate::error::{GatewayError, Result};
use crate::interface::ws::frame::WsFrame;

/// 控制帧写超时。死连接的内核缓冲可能一直收包不报错，
/// 只有写不完成才暴露，所以探测必须带极短的硬期限。
pub const CONTROL_WRITE_DEADLINE: Duration = Duration::from_millis(100);

/// 推送通道抽象，真实实现是一条 WebSocket 写半边
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;

    /// 协议层 Ping 控制帧，活性探测专用
    async fn ping(&self) -> Result<()>;
}

#[derive(Default)]
struct ConnTable {
    conns: HashMap<TerminalKey, Arc<dyn Connection>>,
    /// 用户 -> 该用户当前持有的所有终端（多端登录）
    by_user: HashMap<u64, Vec<TerminalKey>>,
}

pub struct WsManager {
    table: RwLock<ConnTable>,
}

impl WsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(ConnTable::default()),
        })
    }

    /// 注册连接。同一终端标识重复注册时，旧连接被直接替换。
    pub async fn set_connection(&self, key: TerminalKey, conn: Arc<dyn Connection>) {
        let mut table = self.table.write().await;
        let replaced = table.conns.insert(key.clone(), conn).is_some();
        if !replaced {
            table
                .by_user
                .entry(key.user_id)
                .or_default()
                .push(key.clone());
        }
        info!(terminal = %key, replaced, "websocket connection registered");
    }

    pub async fn remove_connection(&self, key: &TerminalKey) {
        let mut table = self.table.write().await;
        if table.conns.remove(key).is_none() {
            return;
        }
        if let Some(keys) = table.by_user.get_mut(&key.user_id) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                table.by_user.remove(&key.user_id);
            }
        }
        info!(terminal = %key, "websocket connection removed");
    }

    pub async fn online_count(&self) -> usize {
        self.table.read().await.conns.len()
    }

    /// 定向推送到单个终端会话
    pub async fn push_msg(&self, key: &TerminalKey, frame: &WsFrame) -> Result<()> {
        let conn = {
            let table = self.table.read().await;
            table.conns.get(key).cloned()
        };
        let conn = conn.ok_or_else(|| GatewayError::Session(format!("terminal {key} offline")))?;
        conn.send(frame.to_text()).await
    }

    /// 推送给一个用户的所有终端。单个终端失败只记日志，
    /// 全部结束后聚合为一个会话错误返回。
    pub async fn broadcast_to_user(&self, user_id: u64, frame: &WsFrame) -> Result<()> {
        self.broadcast_to_users(&[user_id], frame).await
    }

    pub async fn broadcast_to_users(&self, user_ids: &[u64], frame: &WsFrame) -> Result<()> {
        let targets: Vec<(TerminalKey, Arc<dyn Connection>)> = {
            let table = self.table.read().await;
            user_ids
                .iter()
                .flat_map(|uid| table.by_user.get(uid).cloned().unwrap_or_default())
                .filter_map(|key| table.conns.get(&key).cloned().map(|c| (key, c)))
                .collect()
        };
        if targets.is_empty() {
            debug!(?user_ids, kind = %frame.kind, "no online terminal for broadcast");
            return Ok(());
        }

        let text = frame.to_text();
        let mut failed = 0usize;
        for (key, conn) in &targets {
            if let Err(e) = conn.send(text.clone()).await {
                warn!(terminal = %key, error = %e, "push to terminal failed");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(GatewayError::Session(format!(
                "{failed}/{} terminals unreachable",
                targets.len()
            )));
        }
        Ok(())
    }

    /// 活性清扫：对每条连接发协议层 Ping，限时内写不完成的连接注销。
    /// 安静的客户端不算死连接，只有写不进去的才算。
    pub async fn sweep_dead(&self) {
        let snapshot: Vec<(TerminalKey, Arc<dyn Connection>)> = {
            let table = self.table.read().await;
            table
                .conns
                .iter()
                .map(|(k, c)| (k.clone(), Arc::clone(c)))
                .collect()
        };

        for (key, conn) in snapshot {
            match tokio::time::timeout(CONTROL_WRITE_DEADLINE, conn.ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(terminal = %key, error = %e, "liveness probe failed, deregistering");
                    self.remove_connection(&key).await;
                }
                Err(_) => {
                    warn!(terminal = %key, "liveness probe timed out, deregistering");
                    self.remove_connection(&key).await;
                }
            }
        }
    }

    pub fn start_sweeper(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_dead().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct FakeConn {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeConn {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(vec![]),
                fail,
            })
        }
    }

    #[async_trait]
    impl Connection for FakeConn {
        async fn send(&self, text: String) -> Result<()> {
            if self.fail {
                return Err(GatewayError::Session("broken pipe".into()));
            }
            self.sent.lock().await.push(text);
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            if self.fail {
                return Err(GatewayError::Session("broken pipe".into()));
            }
            Ok(())
        }
    }

    /// 半开连接：写入永远不完成，也不报错
    struct StuckConn;

    #[async_trait]
    impl Connection for StuckConn {
        async fn send(&self, _text: String) -> Result<()> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_push_to_registered_terminal() {
        let manager = WsManager::new();
        let key = TerminalKey::new(7, "aaaa");
        let conn = FakeConn::new(false);
        manager.set_connection(key.clone(), conn.clone()).await;

        manager.push_msg(&key, &WsFrame::pong()).await.unwrap();
        assert_eq!(conn.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_push_to_offline_terminal_is_session_error() {
        let manager = WsManager::new();
        let err = manager
            .push_msg(&TerminalKey::new(1, "gone"), &WsFrame::pong())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Session(_)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_user_terminals() {
        let manager = WsManager::new();
        let phone = FakeConn::new(false);
        let tablet = FakeConn::new(false);
        manager
            .set_connection(TerminalKey::new(7, "phone"), phone.clone())
            .await;
        manager
            .set_connection(TerminalKey::new(7, "tablet"), tablet.clone())
            .await;
        manager
            .set_connection(TerminalKey::new(8, "other"), FakeConn::new(false))
            .await;

        manager
            .broadcast_to_user(7, &WsFrame::pong())
            .await
            .unwrap();
        assert_eq!(phone.sent.lock().await.len(), 1);
        assert_eq!(tablet.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_aggregates_partial_failure() {
        let manager = WsManager::new();
        let good = FakeConn::new(false);
        manager
            .set_connection(TerminalKey::new(7, "good"), good.clone())
            .await;
        manager
            .set_connection(TerminalKey::new(7, "bad"), FakeConn::new(true))
            .await;

        let err = manager
            .broadcast_to_user(7, &WsFrame::pong())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Session(_)));
        // 好的终端仍然收到了
        assert_eq!(good.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_nobody_is_ok() {
        let manager = WsManager::new();
        assert!(manager.broadcast_to_user(99, &WsFrame::pong()).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_cleans_user_index() {
        let manager = WsManager::new();
        let key = TerminalKey::new(7, "solo");
        manager
            .set_connection(key.clone(), FakeConn::new(false))
            .await;
        manager.remove_connection(&key).await;

        assert_eq!(manager.online_count().await, 0);
        let table = manager.table.read().await;
        assert!(!table.by_user.contains_key(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reaps_connection_whose_write_never_completes() {
        let manager = WsManager::new();
        manager
            .set_connection(TerminalKey::new(1, "alive"), FakeConn::new(false))
            .await;
        manager
            .set_connection(TerminalKey::new(2, "halfopen"), Arc::new(StuckConn))
            .await;

        manager.sweep_dead().await;
        assert_eq!(manager.online_count().await, 1);
        assert!(
            manager
                .push_msg(&TerminalKey::new(2, "halfopen"), &WsFrame::pong())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_sweep_deregisters_unwritable_connections() {
        let manager = WsManager::new();
        manager
            .set_connection(TerminalKey::new(1, "alive"), FakeConn::new(false))
            .await;
        manager
            .set_connection(TerminalKey::new(2, "dead"), FakeConn::new(true))
            .await;

        manager.sweep_dead().await;
        assert_eq!(manager.online_count().await, 1);
        assert!(
            manager
                .push_msg(&TerminalKey::new(1, "alive"), &WsFrame::pong())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_replacing_connection_keeps_single_index_entry() {
        let manager = WsManager::new();
        let key = TerminalKey::new(7, "reuse");
        manager
            .set_connection(key.clone(), FakeConn::new(false))
            .await;
        manager
            .set_connection(key.clone(), FakeConn::new(false))
            .await;

        let table = manager.table.read().await;
        assert_eq!(table.by_user.get(&7).map(Vec::len), Some(1));
    }
}
