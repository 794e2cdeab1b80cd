//! BTT 报文解码
//!
//! 把信封解码成统一的 [`DeviceStatus`]：心跳产出设备补丁（电量滤波、
//! 坐标换算、地址解析），指令类报文产出指令回显或应答。信封坏掉才算
//! 解码失败；信封内部的局部问题（反解地址失败、单个数值解析不了）
//! 一律降级处理，不让整条消息作废。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, error, warn};

use super::battery;
use super::charge::ChargeFilter;
use super::message::{self, Envelope, Gnss, Heartbeat};
use crate::domain::models::{
    Command, CommandResult, DevicePatch, DeviceStatus, DeviceType, FixKind, WifiAp, actions,
};
use crate::error::{GatewayError, Result};
use crate::infrastructure::cache::LocalCache;
use crate::infrastructure::geo::wgs84_to_gcj02;
use crate::infrastructure::location::{LocationResolver, WifiLocator};

const FIX_WIFI: i32 = 1;
const FIX_GPS_BD: i32 = 2;
const FIX_GPS: i32 = 3;
const FIX_BD: i32 = 4;
const FIX_LBS: i32 = 5;
const FIX_PHONE: i32 = 6;

pub struct BttAdapter {
    charge: ChargeFilter,
    resolver: Arc<LocationResolver>,
    wifi: Arc<WifiLocator>,
}

impl BttAdapter {
    pub fn new(cache: Arc<LocalCache>, resolver: Arc<LocationResolver>) -> Arc<Self> {
        Arc::new(Self {
            charge: ChargeFilter::new(Arc::clone(&cache)),
            wifi: WifiLocator::new(Arc::clone(&resolver), cache),
            resolver,
        })
    }

    /// 信封 → 统一设备状态
    pub async fn decode(&self, env: Envelope) -> DeviceStatus {
        let mut status = DeviceStatus::new(env.device_sn.clone(), DeviceType::Btt, env.to_bytes());

        match env.data_type.as_str() {
            message::HEARTBEAT => match self.decode_heartbeat(&env).await {
                Ok(patch) => status.device = Some(patch),
                Err(e) => error!(sn = %env.device_sn, error = %e, "heartbeat decode failed"),
            },
            message::POWER | message::SET_REPORT_INTERVAL | message::FIND | message::CMD_REPLY => {
                match decode_command(&env) {
                    Ok(cmd) => status.command = Some(cmd),
                    Err(e) => error!(sn = %env.device_sn, error = %e, "command decode failed"),
                }
            }
            other => debug!(sn = %env.device_sn, data_type = other, "ignored message type"),
        }

        status
    }

    async fn decode_heartbeat(&self, env: &Envelope) -> Result<DevicePatch> {
        let hb: Heartbeat = serde_json::from_value(env.data.clone())
            .map_err(|e| GatewayError::Decode(format!("heartbeat payload: {e}")))?;

        if hb.gnss.len() != 1 {
            warn!(sn = %env.device_sn, count = hb.gnss.len(), "unexpected GNSS descriptor count");
        } else if hb.gnss[0].lng.is_empty() && hb.gnss[0].bssid.is_empty() {
            warn!(sn = %env.device_sn, "GNSS carries neither coordinates nor wifi list");
        }

        let vol: i32 = lenient_num(&hb.bat.vol, "vol");
        let csq: i32 = lenient_num(&hb.lte.csq, "csq");
        let interval: i32 = lenient_num(&hb.other.gpstime, "gpstime");
        let steps: i64 = lenient_num(&hb.health.step, "step");

        let (charging, electricity) = self
            .charge
            .filter(&env.device_sn, battery::vol_to_percent(vol))
            .await;

        let mut patch = DevicePatch {
            origin_sn: Some(env.device_sn.clone()),
            device_type: Some(DeviceType::Btt),
            signal: Some(battery::csq_as_percent(csq)),
            interval: Some(interval),
            steps: Some(steps),
            charging: Some(charging),
            electricity: Some(electricity),
            ..Default::default()
        };

        match hb.gnss.first() {
            Some(gnss) => match self.resolve_fix(gnss).await {
                Ok(fix) => {
                    patch.latitude = fix.latitude;
                    patch.longitude = fix.longitude;
                    patch.altitude = Some(fix.altitude);
                    patch.satellites = Some(fix.satellites);
                    patch.fix_kind = Some(fix.kind);
                    patch.fix_time = Some(fix.fix_time);
                    patch.accuracy = fix.accuracy;
                    patch.speed = Some(fix.speed);
                    patch.heading = Some(fix.heading);
                    patch.address = fix.address;
                    patch.last_online = Some(fix.fix_time);
                }
                Err(e) => {
                    error!(sn = %env.device_sn, error = %e, "gnss descriptor unusable");
                    patch.last_online = Some(Utc::now());
                }
            },
            None => patch.last_online = Some(Utc::now()),
        }

        Ok(patch)
    }

    async fn resolve_fix(&self, gnss: &Gnss) -> Result<Fix> {
        let mut fix = Fix {
            kind: FixKind::Unknown,
            latitude: None,
            longitude: None,
            altitude: lenient_num(&gnss.alt, "alt"),
            satellites: lenient_num(&gnss.sates, "sates"),
            accuracy: None,
            speed: lenient_num(&gnss.speed, "speed"),
            heading: lenient_num(&gnss.direc, "direc"),
            address: None,
            fix_time: parse_fix_time(&gnss.time),
        };

        match lenient_num::<i32>(&gnss.kind, "type") {
            FIX_GPS | FIX_GPS_BD | FIX_BD => {
                fix.kind = FixKind::Gps;
                if gnss.lng.is_empty() || gnss.lat.is_empty() {
                    return Err(GatewayError::Decode(format!(
                        "gps fix without coordinates: ({},{})",
                        gnss.lng, gnss.lat
                    )));
                }
                let lng: f64 = gnss.lng.parse().map_err(|_| {
                    GatewayError::Decode(format!("invalid coordinates: ({},{})", gnss.lng, gnss.lat))
                })?;
                let lat: f64 = gnss.lat.parse().map_err(|_| {
                    GatewayError::Decode(format!("invalid coordinates: ({},{})", gnss.lng, gnss.lat))
                })?;
                let (lng, lat) = wgs84_to_gcj02(lng, lat);
                fix.longitude = Some(lng);
                fix.latitude = Some(lat);
                match self.resolver.reverse_geocode(lat, lng).await {
                    Ok(address) => fix.address = Some(address),
                    // 全部服务商失败也保留坐标，只把地址留空
                    Err(e) => {
                        warn!(error = %e, "reverse geocode failed, keeping coordinates");
                        fix.address = Some(String::new());
                    }
                }
            }
            FIX_WIFI => {
                fix.kind = FixKind::Wifi;
                let aps = parse_wifi_list(&gnss.bssid, &gnss.rssi)?;
                if let Some(net) = self.wifi.resolve(aps).await {
                    fix.latitude = Some(net.latitude);
                    fix.longitude = Some(net.longitude);
                    fix.accuracy = Some(net.accuracy);
                    fix.address = Some(net.address);
                }
            }
            // 基站与手机定位暂不做坐标解析，只保留定位方式
            FIX_LBS => fix.kind = FixKind::Lbs,
            FIX_PHONE => fix.kind = FixKind::Phone,
            other => warn!(code = other, "unknown gnss type"),
        }

        Ok(fix)
    }
}

struct Fix {
    kind: FixKind,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: f64,
    satellites: i32,
    accuracy: Option<f64>,
    speed: f64,
    heading: f64,
    address: Option<String>,
    fix_time: DateTime<Utc>,
}

fn decode_command(env: &Envelope) -> Result<Command> {
    let mut cmd = Command::default();
    match env.data_type.as_str() {
        message::POWER => {
            let action = env
                .data
                .get(0)
                .and_then(|v| v.get("action"))
                .and_then(|v| v.as_str());
            cmd.action = if action == Some("reboot") {
                actions::REBOOT.to_string()
            } else {
                actions::POWER_OFF.to_string()
            };
        }
        message::SET_REPORT_INTERVAL => {
            cmd.action = actions::SET_REPORT_INTERVAL.to_string();
            let gpstime = env
                .data
                .get(0)
                .and_then(|v| v.get("gpstime"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| GatewayError::Decode("interval echo without gpstime".into()))?;
            cmd.args = vec![gpstime.to_string()];
        }
        message::FIND => {
            cmd.action = actions::FIND.to_string();
            if let Some(first) = env.data.get(0) {
                cmd.args = vec![first.to_string()];
            }
        }
        message::CMD_REPLY => {
            cmd.result = Some(CommandResult {
                command_id: env.message_id,
                succeed: env.code == "1",
                msg: env.code.clone(),
                extra: Vec::new(),
            });
        }
        other => {
            return Err(GatewayError::Decode(format!(
                "not a command message: {other}"
            )));
        }
    }
    Ok(cmd)
}

/// 宽容数值解析：空串或解析失败回退默认值，坏值只告警不中止
fn lenient_num<T: FromStr + Default>(s: &str, field: &'static str) -> T {
    if s.is_empty() {
        return T::default();
    }
    match s.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(field, value = s, "unparseable numeric field, using default");
            T::default()
        }
    }
}

/// 固件时间按本地时区给出，格式 `YYYY-MM-DD HH:MM:SS`，坏时间回退当前时刻
fn parse_fix_time(s: &str) -> DateTime<Utc> {
    match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        Ok(naive) => Local
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        Err(_) => {
            warn!(value = s, "invalid fix time, using now");
            Utc::now()
        }
    }
}

fn parse_wifi_list(bssid: &str, rssi: &str) -> Result<Vec<WifiAp>> {
    let macs: Vec<&str> = bssid.split('|').collect();
    let rssis: Vec<&str> = rssi.split('|').collect();
    if macs.len() != rssis.len() {
        return Err(GatewayError::Decode(format!(
            "wifi list length mismatch: {} macs, {} rssi",
            macs.len(),
            rssis.len()
        )));
    }
    macs.iter()
        .zip(rssis)
        .map(|(mac, r)| {
            let rssi = r
                .parse()
                .map_err(|_| GatewayError::Decode(format!("invalid rssi: {r}")))?;
            Ok(WifiAp {
                mac: mac.to_string(),
                rssi,
            })
        })
        .collect()
}
