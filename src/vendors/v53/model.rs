//! V53 中继平台推送的消息结构

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// 通知信封：`msg_type` 决定 `data` 的形状
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyMsg {
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
}

/// 位置/心跳推送的载荷（0200、0201、0002 共用）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceGeo {
    /// 设备号码，即本厂商的原厂序列号
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub drive: Option<Drive>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "wifiInfos", default)]
    pub wifi_infos: Vec<WifiObservation>,
    #[serde(rename = "lbsInfos", default)]
    pub lbs_infos: Vec<LbsCell>,
    #[serde(default)]
    pub battery: Option<Battery>,
    /// 信号强度（百分比）
    #[serde(rename = "csq", default)]
    pub csq_level: i32,
    #[serde(rename = "satellite", default)]
    pub satellite: i32,
    #[serde(default)]
    pub steps: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// 海拔（米）
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Drive {
    /// 公里每小时，精度 0.1
    #[serde(default)]
    pub speed: f64,
    /// 0-359，正北为 0，顺时针
    #[serde(default)]
    pub direction: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Battery {
    #[serde(rename = "batteryLevel", default)]
    pub battery_level: i32,
    #[serde(default)]
    pub charging: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiObservation {
    pub mac: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LbsCell {
    #[serde(default)]
    pub mcc: u16,
    #[serde(default)]
    pub mnc: u8,
    #[serde(default)]
    pub lac: u16,
    #[serde(default)]
    pub ci: u32,
    #[serde(default)]
    pub rssi: i32,
}

/// 参数查询回应（0104）
#[derive(Debug, Clone, Deserialize)]
pub struct ParamsReply {
    #[serde(default)]
    pub device_phone: String,
    #[serde(rename = "reportInterval", default)]
    pub report_interval: i32,
}

/// 终端通用应答 / 文本指令应答（8103_reply、8300_reply）
#[derive(Debug, Clone, Deserialize)]
pub struct CommandReply {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub command_id: i64,
    #[serde(default)]
    pub succeed: bool,
    #[serde(default)]
    pub msg: String,
}
