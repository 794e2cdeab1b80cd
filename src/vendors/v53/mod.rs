//! V53 系定位器接入（HTTP 中继通道）
//!
//! 设备走 JT808 协议挂在中继平台上，平台把解析好的消息以 JSON 形式
//! POST 到本服务的 notify 端点；下行指令反向 POST 文本指令给平台。

mod driver;
mod model;

pub use driver::V53Driver;
pub use model::{DeviceGeo, NotifyMsg};
