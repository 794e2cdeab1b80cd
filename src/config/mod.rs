//! 网关配置模块
//!
//! TOML 文件 + 环境变量覆盖，缺省值兜底。

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// 死连接清理间隔（秒）
    pub ws_sweep_secs: u64,
    /// 首帧鉴权超时（秒）
    pub ws_auth_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ws_sweep_secs: 600,
            ws_auth_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "tracker-gateway".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct V53Config {
    /// 接收 808 平台协议推送的监听端口
    pub listen_port: u16,
    /// 下行指令中继地址，形如 http://host:port/device/
    pub relay_url: String,
}

impl Default for V53Config {
    fn default() -> Self {
        Self {
            listen_port: 5353,
            relay_url: "http://127.0.0.1:8008/device/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub tx_app_key: String,
    pub wayz_app_key: String,
    /// 腾讯融合定位限流（官网免费 qps 为 5）
    pub tx_network_qps: u32,
    /// 腾讯逆地址解析限流（官网免费 qps 为 100）
    pub tx_geocoder_qps: u32,
    /// 微智融合定位限流（免费 qps 为 1）
    pub wz_network_qps: u32,
    /// 外呼工作池上限
    pub worker_limit: usize,
    /// 单次调用硬超时（毫秒）
    pub call_timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            tx_app_key: String::new(),
            wayz_app_key: String::new(),
            tx_network_qps: 5,
            tx_geocoder_qps: 100,
            wz_network_qps: 1,
            worker_limit: 200,
            call_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me".to_string(),
            issuer: "tracker-gateway".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub v53: V53Config,
    pub location: LocationConfig,
    pub jwt: JwtConfig,
    /// 本地缓存快照等数据文件的目录
    pub data_path: String,
    pub log_level: String,
}

impl Settings {
    /// 读取配置文件；不存在时返回全默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| GatewayError::Config(format!("read {}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| GatewayError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            Settings::default()
        };
        settings.apply_env_overrides();
        if settings.data_path.is_empty() {
            settings.data_path = "data".to_string();
        }
        if settings.log_level.is_empty() {
            settings.log_level = "info".to_string();
        }
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("GATEWAY_SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = env::var("GATEWAY_MQTT_BROKER") {
            self.mqtt.broker = v;
        }
        if let Ok(v) = env::var("GATEWAY_TX_APP_KEY") {
            self.location.tx_app_key = v;
        }
        if let Ok(v) = env::var("GATEWAY_WAYZ_APP_KEY") {
            self.location.wayz_app_key = v;
        }
        if let Ok(v) = env::var("GATEWAY_JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("GATEWAY_DATA_PATH") {
            self.data_path = v;
        }
        if let Ok(v) = env::var("GATEWAY_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}
