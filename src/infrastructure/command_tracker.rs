//! 待应答指令表
//!
//! 下发指令后在这里登记，等硬件的异步应答回来时按指令 id 关联回
//! 发起的终端会话。带固定 TTL，后台周期清扫过期条目。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::models::{Command, TerminalKey};

/// 指令登记后 30 秒内未见应答即视为过期
const COMMAND_TTL: Duration = Duration::from_secs(30);
/// 清扫周期
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// 单次清扫上限，小量多次处理，避免长时间占用锁
const SWEEP_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub terminal: TerminalKey,
    pub command: Command,
    expire_at: Instant,
}

/// 指令关联表
pub struct CommandTracker {
    pending: Mutex<HashMap<i64, PendingCommand>>,
}

impl CommandTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub async fn add(&self, command_id: i64, terminal: TerminalKey, command: Command) {
        let mut pending = self.pending.lock().await;
        pending.insert(
            command_id,
            PendingCommand {
                terminal,
                command,
                expire_at: Instant::now() + COMMAND_TTL,
            },
        );
        debug!(command_id, "pending command registered");
    }

    /// 单次投递语义：查到即删，过期但未被清扫的条目同样按未找到处理。
    /// 同一 id 第二次查询必然未找到（迟到或重复的应答不会被二次匹配）。
    pub async fn get_and_remove(&self, command_id: i64) -> Option<PendingCommand> {
        let mut pending = self.pending.lock().await;
        let cmd = pending.remove(&command_id)?;
        if Instant::now() > cmd.expire_at {
            debug!(command_id, "pending command already expired");
            return None;
        }
        Some(cmd)
    }

    /// 启动过期清扫任务。清扫只是兜底的垃圾回收，正确性由
    /// `get_and_remove` 的过期判断保证。
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.sweep_expired().await;
            }
        })
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let expired: Vec<i64> = pending
            .iter()
            .filter(|(_, cmd)| now > cmd.expire_at)
            .map(|(id, _)| *id)
            .take(SWEEP_BATCH)
            .collect();
        if expired.is_empty() {
            return;
        }
        for id in &expired {
            pending.remove(id);
        }
        debug!(count = expired.len(), "expired pending commands swept");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_command(action: &str) -> Command {
        Command {
            action: action.to_string(),
            args: vec![],
            result: None,
        }
    }

    #[tokio::test]
    async fn test_get_and_remove_is_single_delivery() {
        let tracker = CommandTracker::new();
        let key = TerminalKey::new(7, "abc");
        tracker.add(100, key.clone(), sample_command("LOCATE")).await;

        let first = tracker.get_and_remove(100).await;
        assert!(first.is_some());
        assert_eq!(first.unwrap().terminal, key);

        // 同一 id 第二次查询必须是未找到
        assert!(tracker.get_and_remove(100).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let tracker = CommandTracker::new();
        assert!(tracker.get_and_remove(1).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_honored() {
        let tracker = CommandTracker::new();
        tracker
            .add(42, TerminalKey::new(1, "t"), sample_command("FIND"))
            .await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(tracker.get_and_remove(42).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_found_before_ttl() {
        let tracker = CommandTracker::new();
        tracker
            .add(43, TerminalKey::new(1, "t"), sample_command("FIND"))
            .await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(tracker.get_and_remove(43).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_expired_entries() {
        let tracker = CommandTracker::new();
        for id in 0..5 {
            tracker
                .add(id, TerminalKey::new(1, "t"), sample_command("LOCATE"))
                .await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        tracker.sweep_expired().await;

        let pending = tracker.pending.lock().await;
        assert!(pending.is_empty());
    }
}
