//! 腾讯地图位置服务
//!
//! 智能硬件定位 POST /ws/location/v1/network，
//! 逆地址解析 GET /ws/geocoder/v1/。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CallGate, LocationProvider, NetworkFix, TokenBucket};
use crate::config::LocationConfig;
use crate::domain::models::WifiAp;
use crate::error::{GatewayError, Result};

const DEFAULT_BASE: &str = "https://apis.map.qq.com";

pub struct TencentProvider {
    base_url: String,
    app_key: String,
    gate: Arc<CallGate>,
    network_limiter: TokenBucket,
    geocoder_limiter: TokenBucket,
}

#[derive(Serialize)]
struct WifiEntry {
    mac: String,
    rssi: i32,
}

#[derive(Serialize)]
struct NetworkRequest {
    wifiinfo: Vec<WifiEntry>,
    key: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    status: i32,
    #[serde(default)]
    message: String,
    result: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct NetworkResult {
    #[serde(default)]
    address: String,
    location: Option<Point>,
}

#[derive(Deserialize)]
struct Point {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: f64,
}

#[derive(Deserialize)]
struct GeocoderResult {
    address: String,
}

impl TencentProvider {
    pub fn new(cfg: &LocationConfig, gate: Arc<CallGate>) -> Self {
        Self::with_base_url(cfg, gate, DEFAULT_BASE)
    }

    pub fn with_base_url(cfg: &LocationConfig, gate: Arc<CallGate>, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key: cfg.tx_app_key.clone(),
            gate,
            network_limiter: TokenBucket::per_second(cfg.tx_network_qps),
            geocoder_limiter: TokenBucket::per_second(cfg.tx_geocoder_qps),
        }
    }

    fn parse_response(body: &[u8]) -> Result<serde_json::Value> {
        let response: ApiResponse = serde_json::from_slice(body)?;
        if response.status != 0 {
            return Err(GatewayError::Provider(format!(
                "tencent api error: {}",
                response.message
            )));
        }
        response
            .result
            .ok_or_else(|| GatewayError::Provider("tencent api returned empty result".into()))
    }
}

#[async_trait]
impl LocationProvider for TencentProvider {
    fn name(&self) -> &'static str {
        "tencent"
    }

    async fn locate_by_network(&self, aps: &[WifiAp]) -> Result<NetworkFix> {
        let request = NetworkRequest {
            wifiinfo: aps
                .iter()
                .map(|ap| WifiEntry {
                    mac: ap.mac.clone(),
                    rssi: ap.rssi,
                })
                .collect(),
            key: self.app_key.clone(),
        };
        let builder = self
            .gate
            .client()
            .post(format!("{}/ws/location/v1/network", self.base_url))
            .json(&request);

        let body = self.gate.execute(&self.network_limiter, builder).await?;
        let result = Self::parse_response(&body)?;
        let parsed: NetworkResult = serde_json::from_value(result)?;
        let point = parsed
            .location
            .ok_or_else(|| GatewayError::Provider("tencent network fix without location".into()))?;
        Ok(NetworkFix {
            address: parsed.address,
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: point.accuracy,
        })
    }

    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<String> {
        let builder = self
            .gate
            .client()
            .get(format!("{}/ws/geocoder/v1/", self.base_url))
            .query(&[
                ("location", format!("{latitude},{longitude}")),
                ("key", self.app_key.clone()),
            ]);

        let body = self.gate.execute(&self.geocoder_limiter, builder).await?;
        let result = Self::parse_response(&body)?;
        let parsed: GeocoderResult = serde_json::from_value(result)?;
        Ok(parsed.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> TencentProvider {
        let cfg = LocationConfig {
            tx_app_key: "test-key".into(),
            ..Default::default()
        };
        let gate = CallGate::new(4, Duration::from_secs(2));
        TencentProvider::with_base_url(&cfg, gate, base)
    }

    #[tokio::test]
    async fn test_geocoder_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/geocoder/v1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 0,
                "message": "query ok",
                "result": {"address": "北京市海淀区"}
            })))
            .mount(&server)
            .await;

        let addr = provider(&server.uri())
            .reverse_geocode(39.9, 116.4)
            .await
            .unwrap();
        assert_eq!(addr, "北京市海淀区");
    }

    #[tokio::test]
    async fn test_non_zero_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 301,
                "message": "missing key"
            })))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .reverse_geocode(39.9, 116.4)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing key"));
    }

    #[tokio::test]
    async fn test_network_fix_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ws/location/v1/network"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 0,
                "result": {
                    "address": "某地",
                    "location": {"latitude": 39.98, "longitude": 116.47, "accuracy": 35.0}
                }
            })))
            .mount(&server)
            .await;

        let aps = vec![WifiAp { mac: "AA:BB".into(), rssi: -46 }];
        let fix = provider(&server.uri())
            .locate_by_network(&aps)
            .await
            .unwrap();
        assert_eq!(fix.address, "某地");
        assert_eq!(fix.accuracy, 35.0);
    }
}
