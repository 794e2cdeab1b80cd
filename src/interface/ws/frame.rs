//! 推送帧格式
//!
//! 上下行统一为 `{type, data}` 的 JSON 帧。客户端到服务端只有
//! 首帧鉴权和 ping 两种；服务端到客户端有 auth、device_update、
//! command_result、pong 四种。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::{CommandResult, DeviceRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl WsFrame {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// 鉴权成功应答，携带本会话的终端标识
    pub fn auth(terminal_key: &str) -> Self {
        Self::new("auth", serde_json::json!({ "terminal_key": terminal_key }))
    }

    pub fn pong() -> Self {
        Self::new("pong", Value::Null)
    }

    pub fn device_update(record: &DeviceRecord) -> Self {
        Self::new(
            "device_update",
            serde_json::to_value(record).unwrap_or_default(),
        )
    }

    pub fn command_result(result: &CommandResult) -> Self {
        Self::new(
            "command_result",
            serde_json::to_value(result).unwrap_or_default(),
        )
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 客户端首帧：token 必填，ws_key 用于断线重连时复用原终端标识
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    pub token: String,
    #[serde(default)]
    pub ws_key: Option<String>,
}
