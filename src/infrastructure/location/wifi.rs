//! WiFi 指纹定位
//!
//! 指纹键 = AP 列表按 MAC 降序排序后的拼接串，排序保证同一组扫描
//! 不论上报顺序如何都命中同一个缓存键。解析失败是软失败：打日志、
//! 留空，绝不向上抛成定位错误。

use std::sync::Arc;

use tracing::{debug, error};

use super::{LocationResolver, NetworkFix};
use crate::domain::models::{WifiAp, joined_macs};
use crate::infrastructure::cache::LocalCache;

const WIFI_NAMESPACE: &str = "wifi";

pub struct WifiLocator {
    resolver: Arc<LocationResolver>,
    cache: Arc<LocalCache>,
}

impl WifiLocator {
    pub fn new(resolver: Arc<LocationResolver>, cache: Arc<LocalCache>) -> Arc<Self> {
        Arc::new(Self { resolver, cache })
    }

    /// 指纹缓存键
    pub fn fingerprint(aps: &mut [WifiAp]) -> String {
        aps.sort_by(|a, b| b.mac.cmp(&a.mac));
        joined_macs(aps)
    }

    /// 解析一组 AP 观测；`None` 表示软失败
    pub async fn resolve(&self, mut aps: Vec<WifiAp>) -> Option<NetworkFix> {
        if aps.is_empty() {
            return None;
        }
        let key = Self::fingerprint(&mut aps);

        if let Some(hit) = self.cache.get::<NetworkFix>(WIFI_NAMESPACE, &key).await {
            debug!(fingerprint = %key, "wifi fingerprint cache hit");
            return Some(hit);
        }

        match self.resolver.locate_by_network(&aps).await {
            Ok(fix) => {
                // 只缓存成功结果
                self.cache.set(WIFI_NAMESPACE, &key, &fix).await;
                Some(fix)
            }
            Err(e) => {
                error!(fingerprint = %key, error = %e, "network positioning failed");
                None
            }
        }
    }
}
