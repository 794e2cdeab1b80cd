//! 微智（Wayz）位置服务
//!
//! POST /location/hub/v1/track_points，响应坐标系按 gcj02 返回。
//! 信号强度按绝对值上送；空地址视为失败。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CallGate, LocationProvider, NetworkFix, TokenBucket};
use crate::config::LocationConfig;
use crate::domain::models::WifiAp;
use crate::error::{GatewayError, Result};

const DEFAULT_BASE: &str = "https://api.newayz.com";

pub struct WayzProvider {
    base_url: String,
    access_key: String,
    gate: Arc<CallGate>,
    network_limiter: TokenBucket,
}

#[derive(Serialize)]
struct WifiEntry {
    #[serde(rename = "macAddress")]
    mac_address: String,
    #[serde(rename = "signalStrength")]
    signal_strength: i32,
}

#[derive(Serialize)]
struct Asset {
    id: String,
}

#[derive(Serialize)]
struct TrackPointRequest {
    asset: Asset,
    location: TrackPointLocation,
}

#[derive(Serialize)]
struct TrackPointLocation {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    wifis: Vec<WifiEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

#[derive(Serialize)]
struct Position {
    point: Point,
}

#[derive(Serialize)]
struct Point {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct ApiResponse {
    location: RespLocation,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RespLocation {
    address: RespAddress,
    position: RespPosition,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RespAddress {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RespPosition {
    point: RespPoint,
    accuracy: f64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RespPoint {
    longitude: f64,
    latitude: f64,
}

impl WayzProvider {
    pub fn new(cfg: &LocationConfig, gate: Arc<CallGate>) -> Self {
        Self::with_base_url(cfg, gate, DEFAULT_BASE)
    }

    pub fn with_base_url(cfg: &LocationConfig, gate: Arc<CallGate>, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: cfg.wayz_app_key.clone(),
            gate,
            network_limiter: TokenBucket::per_second(cfg.wz_network_qps),
        }
    }

    async fn call_track_points(&self, request: &TrackPointRequest) -> Result<ApiResponse> {
        let builder = self
            .gate
            .client()
            .post(format!("{}/location/hub/v1/track_points", self.base_url))
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("response_sprf", "gcj02"),
            ])
            .json(request);

        let body = self.gate.execute(&self.network_limiter, builder).await?;
        let response: ApiResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Provider(format!("unmarshal wayz response failed: {e}")))?;
        if response.location.address.name.is_empty() {
            return Err(GatewayError::Provider(
                "wayz location service returned empty address".into(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl LocationProvider for WayzProvider {
    fn name(&self) -> &'static str {
        "wayz"
    }

    async fn locate_by_network(&self, aps: &[WifiAp]) -> Result<NetworkFix> {
        let request = TrackPointRequest {
            asset: Asset {
                id: Uuid::new_v4().to_string(),
            },
            location: TrackPointLocation {
                wifis: aps
                    .iter()
                    .map(|ap| WifiEntry {
                        mac_address: ap.mac.clone(),
                        signal_strength: ap.rssi.abs(),
                    })
                    .collect(),
                position: None,
            },
        };
        let response = self.call_track_points(&request).await?;
        Ok(NetworkFix {
            address: response.location.address.name,
            latitude: response.location.position.point.latitude,
            longitude: response.location.position.point.longitude,
            accuracy: response.location.position.accuracy,
        })
    }

    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<String> {
        let request = TrackPointRequest {
            asset: Asset {
                id: Uuid::new_v4().to_string(),
            },
            location: TrackPointLocation {
                wifis: Vec::new(),
                position: Some(Position {
                    point: Point {
                        latitude,
                        longitude,
                    },
                }),
            },
        };
        let response = self.call_track_points(&request).await?;
        Ok(response.location.address.name)
    }
}
