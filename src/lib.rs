//! 多厂商 GPS 定位器接入网关
//!
//! 把不同厂商、不同协议（MQTT、HTTP 中继）的定位器上行统一归一化为
//! 设备状态，落档并实时推送给持有设备的用户；同时提供统一的下行
//! 指令面，把应答按指令 id 关联回发起的终端会话。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod server;
pub mod vendors;

pub use config::Settings;
pub use error::{GatewayError, Result};
pub use server::Gateway;
