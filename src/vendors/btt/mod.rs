//! BTT 系定位器接入（MQTT 通道）
//!
//! 上行为 JSON 报文：心跳（含定位、电压、步数）、指令回显与指令应答。
//! 下行指令通过 MQTT 发布到设备专属话题。电量与充电状态由电压换算
//! 加滞回滤波得到，硬件本身不上报充电位。

mod adapter;
mod battery;
mod charge;
mod driver;
mod message;

pub use adapter::BttAdapter;
pub use charge::{ChargeFilter, ChargeState};
pub use driver::BttDriver;
pub use message::Envelope;
