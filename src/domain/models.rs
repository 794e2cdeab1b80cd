//! 领域模型
//!
//! 所有厂商的原始报文，不管什么机型、什么格式，最终都整理成这里的统一表示。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 设备类型（厂商家族）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Btt,
    V53,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Btt => "btt",
            DeviceType::V53 => "v53",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btt" => Ok(DeviceType::Btt),
            "v53" => Ok(DeviceType::V53),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// 定位方式标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixKind {
    #[serde(rename = "GPS")]
    Gps,
    #[serde(rename = "WIFI")]
    Wifi,
    /// 基站定位
    #[serde(rename = "LBS")]
    Lbs,
    #[serde(rename = "PHONE")]
    Phone,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixKind::Gps => "GPS",
            FixKind::Wifi => "WIFI",
            FixKind::Lbs => "LBS",
            FixKind::Phone => "PHONE",
            FixKind::Unknown => "UNKNOWN",
        }
    }
}

/// 设备状态补丁
///
/// 稀疏视图：报文带了什么字段就设什么字段，`None` 表示"未知"而不是零值，
/// 处理器据此能区分"没带电量"和"电量为 0"。只由厂商适配器产出，
/// 只由消息处理器消费。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePatch {
    pub id: Option<String>,
    pub origin_sn: Option<String>,
    pub device_type: Option<DeviceType>,
    /// 电量百分比
    pub electricity: Option<i32>,
    pub charging: Option<bool>,
    pub steps: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub satellites: Option<i32>,
    pub fix_kind: Option<FixKind>,
    pub fix_time: Option<DateTime<Utc>>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub address: Option<String>,
    /// 最后通信时间
    pub last_online: Option<DateTime<Utc>>,
    /// SIM 卡信号强度（百分比）
    pub signal: Option<i32>,
    /// 上报间隔（秒）
    pub interval: Option<i32>,
}

impl DevicePatch {
    /// 定位是否失败：无可用坐标，或坐标恰为 (0,0)
    pub fn fix_failed(&self) -> bool {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => lat == 0.0 && lng == 0.0,
            _ => true,
        }
    }

    /// 清空所有定位相关字段。已知失败的定位绝不能写入设备记录。
    pub fn clear_fix_fields(&mut self) {
        self.fix_time = None;
        self.accuracy = None;
        self.speed = None;
        self.heading = None;
        self.latitude = None;
        self.longitude = None;
        self.altitude = None;
        self.address = None;
        self.fix_kind = None;
        self.satellites = None;
    }

    /// 转换成更新字段表，None 字段不出现
    pub fn to_update_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let value = serde_json::to_value(self).unwrap_or_default();
        match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
            _ => serde_json::Map::new(),
        }
    }
}

/// 指令动作名（应用层与适配器共用的闭集）
pub mod actions {
    pub const LOCATE: &str = "LOCATE";
    pub const REBOOT: &str = "REBOOT";
    pub const POWER_OFF: &str = "POWER_OFF";
    pub const FIND: &str = "FIND";
    pub const SET_REPORT_INTERVAL: &str = "SET_REPORTINTERVAL";
    pub const AUTO_START: &str = "AUTO_START";
    pub const AUTO_SHUT: &str = "AUTO_SHUT";
}

/// 指令执行结果（设备侧回来的异步应答）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: i64,
    pub succeed: bool,
    pub msg: String,
    #[serde(default)]
    pub extra: Vec<u8>,
}

/// 下行指令
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub result: Option<CommandResult>,
}

/// 统一设备状态封装
///
/// 与设备相关的报文（定位上报、心跳、指令应答）都被看作一次状态，
/// 由各适配器产出、消息处理器一次性消费，本身不落库。
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    /// 原厂序列号（接近原始数据，所以用厂商标识定位记录）
    pub origin_sn: String,
    pub device_type: DeviceType,
    pub device: Option<DevicePatch>,
    pub command: Option<Command>,
    /// 原始报文，留档备查
    pub raw: Vec<u8>,
}

impl DeviceStatus {
    pub fn new(origin_sn: impl Into<String>, device_type: DeviceType, raw: Vec<u8>) -> Self {
        Self {
            origin_sn: origin_sn.into(),
            device_type,
            device: None,
            command: None,
            raw,
        }
    }
}

/// 归一化轨迹点，历史轨迹必须从设备状态导出以保证一致性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub satellites: i32,
    #[serde(rename = "type")]
    pub kind: FixKind,
    pub fix_time: DateTime<Utc>,
    pub accuracy: f64,
    pub speed: f64,
    pub heading: f64,
}

/// WiFi 接入点观测
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiAp {
    pub mac: String,
    pub rssi: i32,
}

/// 返回 AP 列表的 mac 拼接串（调用方负责先排序）
pub fn joined_macs(aps: &[WifiAp]) -> String {
    aps.iter()
        .map(|ap| ap.mac.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

/// 终端会话标识
///
/// 标识一个逻辑客户端会话，与底层 socket 解耦。一个用户可以同时持有
/// 多个终端（多端登录），一个物理连接恰好对应一个 TerminalKey。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalKey {
    pub user_id: u64,
    /// 随机短串
    pub token: String,
}

impl TerminalKey {
    pub fn new(user_id: u64, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }
}

impl fmt::Display for TerminalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.token)
    }
}

impl FromStr for TerminalKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, token) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed terminal key: {s}"))?;
        let user_id = uid
            .parse()
            .map_err(|_| format!("malformed terminal key: {s}"))?;
        Ok(Self {
            user_id,
            token: token.to_string(),
        })
    }
}

/// 报警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    LowBattery,
    PowerOff,
    OutOfArea,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub device_id: String,
    pub kind: AlarmKind,
    pub msg: String,
    pub time: DateTime<Utc>,
}

/// 设备记录（补丁应用后的持久化视图）
///
/// 核心只读写这些字段，完整的设备档案表由外部持久化层负责。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub origin_sn: String,
    #[serde(rename = "type")]
    pub device_type: Option<DeviceType>,
    pub user_id: Option<u64>,
    pub electricity: Option<i32>,
    pub charging: Option<bool>,
    pub steps: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub satellites: Option<i32>,
    pub fix_kind: Option<FixKind>,
    pub fix_time: Option<DateTime<Utc>>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub address: Option<String>,
    pub last_online: Option<DateTime<Utc>>,
    pub signal: Option<i32>,
    pub interval: Option<i32>,
}
