//! BTT 报文信封与心跳载荷
//!
//! 信封示例：
//! ```json
//! {"messageId":102,"deviceSN":"868909071429404","dataType":"1002","data":{...}}
//! ```
//! 应答示例：
//! ```json
//! {"messageId":108,"deviceSN":"869861062618140","dataType":"8001","code":"1","repDataType":"2005"}
//! ```

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

/// 设置上报间隔
pub const SET_REPORT_INTERVAL: &str = "3002";
/// 立即定位
pub const LOCATE: &str = "2005";
/// 发声寻找
pub const FIND: &str = "3006";
/// 指令应答
pub const CMD_REPLY: &str = "8001";
/// 开关机
pub const POWER: &str = "3900";
/// 心跳上报
pub const HEARTBEAT: &str = "1002";
/// 设备信息上报
pub const DEVICE_INFO: &str = "1001";
/// 报警上报
pub const ALARM: &str = "1003";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// 小程序侧有些消息的 id 是字符串，统一归一成数字
    #[serde(
        rename = "messageId",
        default,
        deserialize_with = "deserialize_message_id"
    )]
    pub message_id: i64,

    #[serde(rename = "deviceSN", default)]
    pub device_sn: String,

    #[serde(rename = "dataType", default)]
    pub data_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,

    #[serde(rename = "repDataType", default, skip_serializing_if = "String::is_empty")]
    pub rep_data_type: String,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "envelope serialization failed");
                Vec::new()
            }
        }
    }
}

fn deserialize_message_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("invalid messageId: {n}"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid messageId: {s}"))),
        Some(other) => Err(D::Error::custom(format!(
            "unsupported messageId type: {other}"
        ))),
    }
}

/// 心跳载荷。设备固件把所有数值都编码成字符串，解析侧宽容处理。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "LTE", default)]
    pub lte: Lte,
    #[serde(rename = "GNSS", default)]
    pub gnss: Vec<Gnss>,
    #[serde(rename = "BAT", default)]
    pub bat: Bat,
    #[serde(default)]
    pub other: Other,
    #[serde(default)]
    pub health: Health,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Lte {
    #[serde(default)]
    pub csq: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Gnss {
    #[serde(default)]
    pub lng: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub direc: String,
    /// WiFi 定位时的 AP MAC 列表，`|` 分隔
    #[serde(default)]
    pub bssid: String,
    #[serde(default)]
    pub rssi: String,
    #[serde(default)]
    pub sates: String,
    #[serde(default)]
    pub time: String,
    /// 定位方式：1 WiFi，2 GPS+北斗，3 GPS，4 北斗，5 基站，6 手机
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bat {
    /// 电压（mV）
    #[serde(default)]
    pub vol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Other {
    /// 当前上报间隔（秒）
    #[serde(default)]
    pub gpstime: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub step: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_message_id() {
        let env: Envelope = serde_json::from_str(
            r#"{"messageId":102,"deviceSN":"863644076543074","dataType":"1002"}"#,
        )
        .unwrap();
        assert_eq!(env.message_id, 102);
        assert_eq!(env.device_sn, "863644076543074");
    }

    #[test]
    fn test_string_message_id() {
        let env: Envelope = serde_json::from_str(
            r#"{"messageId":"102","deviceSN":"863644076543074","dataType":"1002"}"#,
        )
        .unwrap();
        assert_eq!(env.message_id, 102);
    }

    #[test]
    fn test_missing_message_id_defaults_to_zero() {
        let env: Envelope =
            serde_json::from_str(r#"{"deviceSN":"863644076543074","dataType":"1002"}"#).unwrap();
        assert_eq!(env.message_id, 0);
    }

    #[test]
    fn test_garbage_message_id_rejected() {
        let parsed = serde_json::from_str::<Envelope>(
            r#"{"messageId":"invalid","deviceSN":"863644076543074","dataType":"1002"}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope {
            message_id: 102,
            device_sn: "863644076543074".into(),
            data_type: HEARTBEAT.into(),
            data: serde_json::json!({"test": "data"}),
            ..Default::default()
        };
        let parsed: Envelope = serde_json::from_slice(&env.to_bytes()).unwrap();
        assert_eq!(parsed.message_id, 102);
        assert_eq!(parsed.device_sn, env.device_sn);
        assert_eq!(parsed.data_type, HEARTBEAT);
    }

    #[test]
    fn test_heartbeat_payload_parses() {
        let data = serde_json::json!({
            "LTE": {"csq": "13"},
            "GNSS": [{
                "lng": "", "lat": "", "alt": "102",
                "bssid": "5C:02:14:FD:89:74|EC:CF:70:6A:E4:46",
                "rssi": "-46|-47", "sates": "0",
                "time": "2025-04-03 13:43:42", "type": "1"
            }],
            "BAT": {"vol": "4020"},
            "other": {"gpstime": "1800"},
            "health": {"step": "0"}
        });
        let hb: Heartbeat = serde_json::from_value(data).unwrap();
        assert_eq!(hb.lte.csq, "13");
        assert_eq!(hb.gnss.len(), 1);
        assert_eq!(hb.gnss[0].kind, "1");
        assert_eq!(hb.bat.vol, "4020");
        assert_eq!(hb.other.gpstime, "1800");
    }
}
