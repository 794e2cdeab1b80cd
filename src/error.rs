//! 统一异常处理模块

use thiserror::Error;

/// 网关错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 设备身份解析失败（唯一会中止整条消息处理的错误）
    #[error("Device identity not resolvable: {0}")]
    Identity(String),

    /// 协议解码错误
    #[error("Protocol decode error: {0}")]
    Decode(String),

    /// 不支持的指令/参数非法
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// 驱动未注册或重复注册
    #[error("Driver registry error: {0}")]
    Driver(String),

    /// 传输层错误（MQTT 发布、HTTP 中继）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 外部定位服务失败（所有服务商兜底仍失败）
    #[error("Location provider error: {0}")]
    Provider(String),

    /// 等待限流令牌或外部调用超时
    #[error("Timed out: {0}")]
    Timeout(String),

    /// 持久化错误
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 推送会话错误（连接不存在或部分发送失败）
    #[error("Session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
