//! 本地键值缓存
//!
//! 命名空间 + 键的两级结构，周期性 JSON 快照落盘，进程重启后充电滤波
//! 等隐藏状态不会归零。值按 JSON 值存取（值语义，取出即拷贝），因此
//! 读路径用读锁即可，不存在调用方长期持有可变引用的冲突。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

struct CacheInner {
    namespaces: HashMap<String, HashMap<String, Value>>,
    dirty: bool,
}

pub struct LocalCache {
    inner: RwLock<CacheInner>,
    /// 为空则没有落盘能力
    snapshot_path: Option<PathBuf>,
}

impl LocalCache {
    pub fn new(snapshot_path: Option<PathBuf>) -> Arc<Self> {
        let namespaces = snapshot_path
            .as_deref()
            .and_then(|path| match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(map) => Some(map),
                    Err(e) => {
                        info!(path = %path.display(), error = %e, "cache snapshot unreadable, starting empty");
                        None
                    }
                },
                Err(_) => None,
            })
            .unwrap_or_default();

        Arc::new(Self {
            inner: RwLock::new(CacheInner {
                namespaces,
                dirty: false,
            }),
            snapshot_path,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let inner = self.inner.read().await;
        inner
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                error!(namespace, key, error = %e, "cache value not serializable");
                return;
            }
        };
        let mut inner = self.inner.write().await;
        inner
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        inner.dirty = true;
    }

    /// 有变更时写出快照
    pub async fn flush(&self) {
        let Some(path) = self.snapshot_path.as_ref() else {
            return;
        };
        let mut inner = self.inner.write().await;
        if !inner.dirty {
            return;
        }
        match serde_json::to_vec(&inner.namespaces) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    error!(path = %path.display(), error = %e, "write cache snapshot failed");
                    return;
                }
                debug!(path = %path.display(), "cache snapshot written");
                inner.dirty = false;
            }
            Err(e) => error!(error = %e, "cache snapshot serialization failed"),
        }
    }

    /// 启动周期落盘任务
    pub fn start_flusher(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.flush().await;
            }
        })
    }
}
