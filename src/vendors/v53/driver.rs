//! V53 驱动：notify 监听 + 文本指令中继
//!
//! 上行：中继平台 POST `/v53/notify`，按 `msg_type` 解码后交给统一处理器。
//! 下行：POST `{relay_url}{sn}/text`，内容是 JT808 文本指令。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::model::{CommandReply, DeviceGeo, NotifyMsg, ParamsReply};
use crate::config::V53Config;
use crate::domain::models::{
    Command, CommandResult, DevicePatch, DeviceStatus, DeviceType, FixKind, WifiAp,
};
use crate::error::{GatewayError, Result};
use crate::infrastructure::cache::LocalCache;
use crate::infrastructure::geo::wgs84_to_gcj02;
use crate::infrastructure::location::{LocationResolver, WifiLocator};
use crate::vendors::{ScheduledPowerDriver, StatusHandler, VendorDriver};

pub struct V53Driver {
    listen_port: u16,
    /// 形如 http://host:port/device/
    relay_url: String,
    client: reqwest::Client,
    decoder: Arc<V53Decoder>,
    handler: Arc<dyn StatusHandler>,
}

impl V53Driver {
    pub fn new(
        cfg: &V53Config,
        cache: Arc<LocalCache>,
        resolver: Arc<LocationResolver>,
        handler: Arc<dyn StatusHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            listen_port: cfg.listen_port,
            relay_url: cfg.relay_url.clone(),
            client: reqwest::Client::new(),
            decoder: V53Decoder::new(cache, resolver),
            handler,
        })
    }

    async fn send_text(&self, command_id: i64, origin_sn: &str, text: &str) -> Result<()> {
        let url = format!("{}{}/text", self.relay_url, origin_sn);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "command_id": command_id,
                "text_content": text,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!(
                "relay rejected text command: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VendorDriver for V53Driver {
    fn device_type(&self) -> DeviceType {
        DeviceType::V53
    }

    async fn start(&self) -> Result<()> {
        let state = NotifyState {
            decoder: Arc::clone(&self.decoder),
            handler: Arc::clone(&self.handler),
            client: self.client.clone(),
            relay_url: self.relay_url.clone(),
        };
        let app = Router::new()
            .route("/v53/notify", post(handle_notify))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .map_err(|e| GatewayError::Transport(format!("bind v53 listener: {e}")))?;
        info!(port = self.listen_port, "v53 notify listener started");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "v53 notify server exited");
            }
        });
        Ok(())
    }

    // 中继平台侧没有订阅概念，绑定/解绑无需动作
    async fn activate(&self, _origin_sn: &str) -> Result<()> {
        Ok(())
    }

    async fn deactivate(&self, _origin_sn: &str) -> Result<()> {
        Ok(())
    }

    async fn locate(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        self.send_text(command_id, origin_sn, "LJDW#").await
    }

    async fn reboot(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        self.send_text(command_id, origin_sn, "RESET#").await
    }

    async fn power_off(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        self.send_text(command_id, origin_sn, "SHUTDOWN#").await
    }

    /// 寻宠：响铃
    async fn find(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        self.send_text(command_id, origin_sn, "bon,1#").await
    }

    async fn set_report_interval(
        &self,
        command_id: i64,
        origin_sn: &str,
        secs: i32,
    ) -> Result<()> {
        self.send_text(command_id, origin_sn, &format!("upload,{secs}#"))
            .await?;
        // 间隔生效有延迟，1 秒后回查一次参数让库里的值跟上
        let client = self.client.clone();
        let url = params_url(&self.relay_url, origin_sn);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            refresh_params(&client, &url).await;
        });
        Ok(())
    }

    fn scheduled_power(&self) -> Option<&dyn ScheduledPowerDriver> {
        Some(self)
    }
}

#[async_trait]
impl ScheduledPowerDriver for V53Driver {
    /// 定时开机，指令 `AUTOMATIC,<enable>,1,<hh:mm>#`
    async fn auto_start(
        &self,
        command_id: i64,
        origin_sn: &str,
        tm: &str,
        enable: bool,
    ) -> Result<()> {
        let enable = if enable { "1" } else { "0" };
        self.send_text(command_id, origin_sn, &format!("AUTOMATIC,{enable},1,{tm}#"))
            .await
    }

    /// 定时关机，指令 `AUTOMATIC,<enable>,0,<hh:mm>#`
    async fn auto_shut(
        &self,
        command_id: i64,
        origin_sn: &str,
        tm: &str,
        enable: bool,
    ) -> Result<()> {
        let enable = if enable { "1" } else { "0" };
        self.send_text(command_id, origin_sn, &format!("AUTOMATIC,{enable},0,{tm}#"))
            .await
    }
}

#[derive(Clone)]
struct NotifyState {
    decoder: Arc<V53Decoder>,
    handler: Arc<dyn StatusHandler>,
    client: reqwest::Client,
    relay_url: String,
}

async fn handle_notify(
    State(state): State<NotifyState>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let msg: NotifyMsg = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            error!(error = %e, "v53 notify is not valid json");
            return (StatusCode::BAD_REQUEST, "Invalid message format");
        }
    };
    let msg_type = msg.msg_type.clone();

    let status = match state.decoder.decode(msg, &body).await {
        Ok(status) => status,
        Err(e) => {
            error!(msg_type, error = %e, "v53 notify decode failed");
            return (StatusCode::BAD_REQUEST, "Invalid message format");
        }
    };

    // 通用应答之后设备参数可能已变化，回查一次
    if msg_type == "8103_reply" && !status.origin_sn.is_empty() {
        let client = state.client.clone();
        let url = params_url(&state.relay_url, &status.origin_sn);
        tokio::spawn(async move {
            refresh_params(&client, &url).await;
        });
    }

    if let Err(e) = state.handler.handle(status).await {
        error!(msg_type, error = %e, "v53 status handling failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
    }
    (StatusCode::OK, "OK")
}

fn params_url(relay_url: &str, origin_sn: &str) -> String {
    format!("{relay_url}{origin_sn}/params")
}

async fn refresh_params(client: &reqwest::Client, url: &str) {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(url, "device params refresh requested")
        }
        Ok(response) => warn!(url, status = %response.status(), "params refresh rejected"),
        Err(e) => warn!(url, error = %e, "params refresh failed"),
    }
}

/// notify 载荷解码，独立于 HTTP 层，便于单测
pub struct V53Decoder {
    resolver: Arc<LocationResolver>,
    wifi: Arc<WifiLocator>,
}

impl V53Decoder {
    fn new(cache: Arc<LocalCache>, resolver: Arc<LocationResolver>) -> Arc<Self> {
        Arc::new(Self {
            wifi: WifiLocator::new(Arc::clone(&resolver), cache),
            resolver,
        })
    }

    async fn decode(&self, msg: NotifyMsg, raw: &[u8]) -> Result<DeviceStatus> {
        let mut status = DeviceStatus::new(String::new(), DeviceType::V53, raw.to_vec());
        match msg.msg_type.as_str() {
            // 位置上报 / 立即定位的回应
            "0200" | "0201" => self.decode_position(&mut status, msg.data).await?,
            "0002" => decode_heartbeat(&mut status, msg.data)?,
            "0104" => decode_params(&mut status, msg.data)?,
            "8103_reply" | "8300_reply" => decode_command_reply(&mut status, msg.data)?,
            other => {
                return Err(GatewayError::Decode(format!(
                    "unsupported msg_type: {other}"
                )));
            }
        }
        Ok(status)
    }

    async fn decode_position(
        &self,
        status: &mut DeviceStatus,
        data: serde_json::Value,
    ) -> Result<()> {
        let geo: DeviceGeo = serde_json::from_value(data)
            .map_err(|e| GatewayError::Decode(format!("position payload: {e}")))?;
        status.origin_sn = geo.phone.clone();

        let time = geo.time.unwrap_or_else(Utc::now);
        let mut patch = DevicePatch {
            origin_sn: Some(geo.phone.clone()),
            device_type: Some(DeviceType::V53),
            steps: Some(geo.steps),
            signal: Some(geo.csq_level),
            satellites: Some(geo.satellite),
            last_online: Some(time),
            fix_time: Some(time),
            ..Default::default()
        };
        // 本厂商硬件直接上报充电位，不需要滞回推断
        if let Some(bat) = &geo.battery {
            patch.electricity = Some(bat.battery_level);
            patch.charging = Some(bat.charging);
        }
        if let Some(drive) = &geo.drive {
            patch.speed = Some(drive.speed);
            patch.heading = Some(f64::from(drive.direction));
        }
        if let Some(loc) = &geo.location {
            let (lng, lat) = wgs84_to_gcj02(loc.longitude, loc.latitude);
            patch.latitude = Some(lat);
            patch.longitude = Some(lng);
            patch.altitude = Some(loc.altitude);
        }

        if patch.latitude.is_some_and(|lat| lat != 0.0) {
            patch.fix_kind = Some(FixKind::Gps);
            let (lat, lng) = (patch.latitude.unwrap_or_default(), patch.longitude.unwrap_or_default());
            match self.resolver.reverse_geocode(lat, lng).await {
                Ok(address) => patch.address = Some(address),
                // 坐标保留，地址留空
                Err(e) => {
                    warn!(error = %e, "reverse geocode failed, keeping coordinates");
                    patch.address = Some(String::new());
                }
            }
        } else if !geo.wifi_infos.is_empty() {
            patch.fix_kind = Some(FixKind::Wifi);
            // WiFi 定位时天线共用，csq 为 0 是无数据而不是零信号
            if patch.signal == Some(0) {
                patch.signal = None;
            }
            let aps = geo
                .wifi_infos
                .iter()
                .map(|w| WifiAp {
                    mac: w.mac.clone(),
                    rssi: w.rssi,
                })
                .collect();
            if let Some(fix) = self.wifi.resolve(aps).await {
                patch.latitude = Some(fix.latitude);
                patch.longitude = Some(fix.longitude);
                patch.accuracy = Some(fix.accuracy);
                patch.address = Some(fix.address);
            }
        } else if !geo.lbs_infos.is_empty() {
            // 基站解析暂不做，只记定位方式
            patch.fix_kind = Some(FixKind::Lbs);
        }

        status.device = Some(patch);
        Ok(())
    }
}

/// 心跳只采信电量和最后通信时间，其余字段都是旧值
fn decode_heartbeat(status: &mut DeviceStatus, data: serde_json::Value) -> Result<()> {
    let geo: DeviceGeo = serde_json::from_value(data)
        .map_err(|e| GatewayError::Decode(format!("heartbeat payload: {e}")))?;
    status.origin_sn = geo.phone.clone();
    let mut patch = DevicePatch {
        origin_sn: Some(geo.phone),
        device_type: Some(DeviceType::V53),
        last_online: Some(geo.time.unwrap_or_else(Utc::now)),
        ..Default::default()
    };
    if let Some(bat) = &geo.battery {
        patch.electricity = Some(bat.battery_level);
    }
    status.device = Some(patch);
    Ok(())
}

fn decode_params(status: &mut DeviceStatus, data: serde_json::Value) -> Result<()> {
    let params: ParamsReply = serde_json::from_value(data)
        .map_err(|e| GatewayError::Decode(format!("params payload: {e}")))?;
    status.origin_sn = params.device_phone.clone();
    status.device = Some(DevicePatch {
        origin_sn: Some(params.device_phone),
        device_type: Some(DeviceType::V53),
        interval: Some(params.report_interval),
        ..Default::default()
    });
    Ok(())
}

fn decode_command_reply(status: &mut DeviceStatus, data: serde_json::Value) -> Result<()> {
    let reply: CommandReply = serde_json::from_value(data)
        .map_err(|e| GatewayError::Decode(format!("command reply payload: {e}")))?;
    status.origin_sn = reply.phone_number;
    status.command = Some(Command {
        result: Some(CommandResult {
            command_id: reply.command_id,
            succeed: reply.succeed,
            msg: reply.msg,
            extra: Vec::new(),
        }),
        ..Default::default()
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn decoder() -> Arc<V53Decoder> {
        V53Decoder::new(LocalCache::new(None), LocationResolver::new(vec![]))
    }

    fn notify(msg_type: &str, data: serde_json::Value) -> NotifyMsg {
        NotifyMsg {
            msg_type: msg_type.into(),
            data,
        }
    }

    #[tokio::test]
    async fn test_position_report_with_gps_fix() {
        let msg = notify(
            "0200",
            serde_json::json!({
                "phone": "13800000000",
                "location": {"latitude": 39.9042, "longitude": 116.3974, "altitude": 50},
                "drive": {"speed": 12.5, "direction": 270},
                "time": "2025-04-03T13:43:42Z",
                "battery": {"batteryLevel": 76, "charging": true},
                "csq": 80, "satellite": 9, "steps": 3200
            }),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        assert_eq!(status.origin_sn, "13800000000");
        let patch = status.device.unwrap();
        assert_eq!(patch.fix_kind, Some(FixKind::Gps));
        assert_eq!(patch.electricity, Some(76));
        assert_eq!(patch.charging, Some(true));
        assert_eq!(patch.steps, Some(3200));
        assert_eq!(patch.signal, Some(80));
        assert_eq!(patch.speed, Some(12.5));
        assert_eq!(patch.heading, Some(270.0));
        // 坐标已转换，地址解析失败时留空
        assert!((patch.latitude.unwrap() - 39.9042).abs() > 1e-4);
        assert_eq!(patch.address.as_deref(), Some(""));
        assert!(!patch.fix_failed());
    }

    #[tokio::test]
    async fn test_position_report_wifi_drops_zero_csq() {
        let msg = notify(
            "0200",
            serde_json::json!({
                "phone": "13800000000",
                "wifiInfos": [{"mac": "AA:11", "rssi": -40}, {"mac": "BB:22", "rssi": -60}],
                "csq": 0, "satellite": 0, "steps": 10
            }),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        let patch = status.device.unwrap();
        assert_eq!(patch.fix_kind, Some(FixKind::Wifi));
        // 共用天线：WiFi 定位时 csq 为 0 不采信
        assert!(patch.signal.is_none());
        // 服务商全失败是软失败
        assert!(patch.fix_failed());
    }

    #[tokio::test]
    async fn test_position_report_lbs_keeps_kind_only() {
        let msg = notify(
            "0200",
            serde_json::json!({
                "phone": "13800000000",
                "lbsInfos": [{"mcc": 460, "mnc": 0, "lac": 1, "ci": 100, "rssi": -70}],
                "csq": 30
            }),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        let patch = status.device.unwrap();
        assert_eq!(patch.fix_kind, Some(FixKind::Lbs));
        assert!(patch.latitude.is_none());
        assert_eq!(patch.signal, Some(30));
    }

    #[tokio::test]
    async fn test_heartbeat_updates_battery_and_last_online_only() {
        let msg = notify(
            "0002",
            serde_json::json!({
                "phone": "13800000000",
                "battery": {"batteryLevel": 42, "charging": false},
                "steps": 999
            }),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        let patch = status.device.unwrap();
        assert_eq!(patch.electricity, Some(42));
        assert!(patch.last_online.is_some());
        // 心跳不采信其它字段
        assert!(patch.steps.is_none());
        assert!(patch.charging.is_none());
        assert!(patch.fix_kind.is_none());
    }

    #[tokio::test]
    async fn test_params_reply_carries_interval() {
        let msg = notify(
            "0104",
            serde_json::json!({"device_phone": "13800000000", "reportInterval": 600}),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        assert_eq!(status.origin_sn, "13800000000");
        assert_eq!(status.device.unwrap().interval, Some(600));
    }

    #[tokio::test]
    async fn test_command_reply_maps_to_result() {
        let msg = notify(
            "8300_reply",
            serde_json::json!({
                "phone_number": "13800000000",
                "command_id": 77,
                "succeed": true,
                "msg": "ok"
            }),
        );
        let status = decoder().decode(msg, b"{}").await.unwrap();
        assert_eq!(status.origin_sn, "13800000000");
        let result = status.command.unwrap().result.unwrap();
        assert_eq!(result.command_id, 77);
        assert!(result.succeed);
    }

    #[tokio::test]
    async fn test_unknown_msg_type_is_rejected() {
        let status = decoder().decode(notify("0300", serde_json::json!({})), b"{}").await;
        assert!(status.is_err());
    }

    struct NoopHandler;

    #[async_trait]
    impl StatusHandler for NoopHandler {
        async fn handle(&self, _status: DeviceStatus) -> Result<()> {
            Ok(())
        }
    }

    fn driver_with_relay(relay_url: String) -> Arc<V53Driver> {
        let cfg = V53Config {
            listen_port: 0,
            relay_url,
        };
        V53Driver::new(
            &cfg,
            LocalCache::new(None),
            LocationResolver::new(vec![]),
            Arc::new(NoopHandler),
        )
    }

    #[tokio::test]
    async fn test_locate_posts_text_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/13800000000/text"))
            .and(body_json(serde_json::json!({
                "command_id": 9,
                "text_content": "LJDW#"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver_with_relay(format!("{}/device/", server.uri()));
        driver.locate(9, "13800000000").await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_start_encodes_schedule_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/13800000000/text"))
            .and(body_json(serde_json::json!({
                "command_id": 3,
                "text_content": "AUTOMATIC,1,1,09:00#"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver_with_relay(format!("{}/device/", server.uri()));
        driver.auto_start(3, "13800000000", "09:00", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_shut_disabled_encodes_zero_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/13800000000/text"))
            .and(body_json(serde_json::json!({
                "command_id": 4,
                "text_content": "AUTOMATIC,0,0,22:30#"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver_with_relay(format!("{}/device/", server.uri()));
        driver.auto_shut(4, "13800000000", "22:30", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_error_surfaces_as_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let driver = driver_with_relay(format!("{}/device/", server.uri()));
        let err = driver.reboot(1, "13800000000").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
