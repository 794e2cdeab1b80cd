//! 外部定位解析层
//!
//! 多个第三方服务商（网络指纹定位、逆地址解析），各自独立限流，
//! 按固定优先级兜底重试，结果可缓存。

pub mod limiter;
pub mod tencent;
pub mod wayz;
pub mod wifi;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::config::LocationConfig;
use crate::domain::models::WifiAp;
use crate::error::{GatewayError, Result};
pub use limiter::TokenBucket;
pub use wifi::WifiLocator;

/// 网络定位结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFix {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

/// 单个定位服务商
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// 网络指纹定位（WiFi 列表）
    async fn locate_by_network(&self, aps: &[WifiAp]) -> Result<NetworkFix>;

    /// 逆地址解析
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<String>;
}

/// 外呼闸门：有界工作池 + 限流令牌 + 整体硬超时
///
/// 所有服务商共用一个工作池，防止压力下外呼任务无界增长。
pub struct CallGate {
    client: reqwest::Client,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl CallGate {
    pub fn new(worker_limit: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::new(),
            workers: Arc::new(Semaphore::new(worker_limit.max(1))),
            timeout,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 执行一次外呼：等工作位、等令牌、发请求，全程受同一个 deadline 约束
    pub async fn execute(
        &self,
        limiter: &TokenBucket,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;

        let _permit = tokio::time::timeout_at(deadline, self.workers.acquire())
            .await
            .map_err(|_| GatewayError::Timeout("timed out waiting for worker slot".into()))?
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        limiter.acquire(deadline).await?;

        let response = tokio::time::timeout_at(deadline, request.send())
            .await
            .map_err(|_| GatewayError::Timeout("provider call timed out".into()))??;
        let body = tokio::time::timeout_at(deadline, response.bytes())
            .await
            .map_err(|_| GatewayError::Timeout("provider response timed out".into()))??;
        Ok(body.to_vec())
    }
}

/// 定位解析器：固定优先级的服务商序列，首个成功即返回
pub struct LocationResolver {
    providers: Vec<Arc<dyn LocationProvider>>,
}

impl LocationResolver {
    pub fn new(providers: Vec<Arc<dyn LocationProvider>>) -> Arc<Self> {
        Arc::new(Self { providers })
    }

    /// 按配置构建默认服务商序列：腾讯优先，微智兜底
    pub fn from_config(cfg: &LocationConfig) -> Arc<Self> {
        let gate = CallGate::new(cfg.worker_limit, Duration::from_millis(cfg.call_timeout_ms));
        Self::new(vec![
            Arc::new(tencent::TencentProvider::new(cfg, Arc::clone(&gate))),
            Arc::new(wayz::WayzProvider::new(cfg, gate)),
        ])
    }

    pub async fn locate_by_network(&self, aps: &[WifiAp]) -> Result<NetworkFix> {
        let mut last_err = GatewayError::Provider("no location provider configured".into());
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.locate_by_network(aps).await {
                Ok(fix) => return Ok(fix),
                Err(e) => {
                    if i < self.providers.len() - 1 {
                        warn!(provider = provider.name(), error = %e,
                            "network positioning failed, trying next provider");
                    }
                    last_err = e;
                }
            }
        }
        Err(GatewayError::Provider(format!(
            "all network positioning providers failed, last error: {last_err}"
        )))
    }

    pub async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<String> {
        let mut last_err = GatewayError::Provider("no location provider configured".into());
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.reverse_geocode(latitude, longitude).await {
                Ok(address) => return Ok(address),
                Err(e) => {
                    if i < self.providers.len() - 1 {
                        warn!(provider = provider.name(), error = %e,
                            "reverse geocoding failed, trying next provider");
                    }
                    last_err = e;
                }
            }
        }
        Err(GatewayError::Provider(format!(
            "all geocoder providers failed, last error: {last_err}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn locate_by_network(&self, _aps: &[WifiAp]) -> Result<NetworkFix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GatewayError::Provider(format!("{} down", self.name)))
            } else {
                Ok(NetworkFix {
                    address: format!("{} addr", self.name),
                    latitude: 39.9,
                    longitude: 116.4,
                    accuracy: 30.0,
                })
            }
        }

        async fn reverse_geocode(&self, _latitude: f64, _longitude: f64) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GatewayError::Provider(format!("{} down", self.name)))
            } else {
                Ok(format!("{} addr", self.name))
            }
        }
    }

    #[tokio::test]
    async fn test_first_success_stops_fallback() {
        let first = ScriptedProvider::new("first", false);
        let second = ScriptedProvider::new("second", false);
        let resolver = LocationResolver::new(vec![first.clone(), second.clone()]);

        let addr = resolver.reverse_geocode(39.9, 116.4).await.unwrap();
        assert_eq!(addr, "first addr");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_runs_in_order() {
        let first = ScriptedProvider::new("first", true);
        let second = ScriptedProvider::new("second", false);
        let resolver = LocationResolver::new(vec![first.clone(), second.clone()]);

        let fix = resolver.locate_by_network(&[]).await.unwrap();
        assert_eq!(fix.address, "second addr");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failed_surfaces_last_error() {
        let first = ScriptedProvider::new("first", true);
        let second = ScriptedProvider::new("second", true);
        let resolver = LocationResolver::new(vec![first, second]);

        let err = resolver.locate_by_network(&[]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("all network positioning providers failed"));
        assert!(msg.contains("second down"));
    }
}
