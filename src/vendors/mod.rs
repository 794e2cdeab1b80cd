//! 厂商接入层
//!
//! 每个厂商家族一个驱动：负责各自的传输通道和报文编解码，解析结果
//! 统一交给 [`StatusHandler`]。业务侧只面向 [`VendorDriver`] 下发指令，
//! 不感知设备说的是哪种方言。

use async_trait::async_trait;

use crate::domain::models::{DeviceStatus, DeviceType};
use crate::error::Result;

pub mod btt;
pub mod registry;
pub mod v53;

pub use registry::DriverRegistry;

/// 上行消息出口（由应用层的消息处理器实现）
#[async_trait]
pub trait StatusHandler: Send + Sync {
    async fn handle(&self, status: DeviceStatus) -> Result<()>;
}

/// 订阅清单：驱动启动时需要知道本厂商当前有哪些设备在册
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    async fn origin_sns(&self, device_type: DeviceType) -> Result<Vec<String>>;
}

/// 厂商驱动统一指令面
///
/// 所有指令都是发完即返回，设备的执行结果以异步应答回流。
/// `command_id` 用于把应答关联回发起方。
#[async_trait]
pub trait VendorDriver: Send + Sync {
    fn device_type(&self) -> DeviceType;

    /// 启动传输通道（连接、订阅、收包循环）
    async fn start(&self) -> Result<()>;

    /// 设备绑定后开始接收其上行
    async fn activate(&self, origin_sn: &str) -> Result<()>;

    /// 解绑后停止接收
    async fn deactivate(&self, origin_sn: &str) -> Result<()>;

    async fn locate(&self, command_id: i64, origin_sn: &str) -> Result<()>;

    async fn reboot(&self, command_id: i64, origin_sn: &str) -> Result<()>;

    async fn power_off(&self, command_id: i64, origin_sn: &str) -> Result<()>;

    /// 发声寻找设备
    async fn find(&self, command_id: i64, origin_sn: &str) -> Result<()>;

    async fn set_report_interval(&self, command_id: i64, origin_sn: &str, secs: i32)
    -> Result<()>;

    /// 定时开关机是可选能力，不支持的厂商返回 None
    fn scheduled_power(&self) -> Option<&dyn ScheduledPowerDriver> {
        None
    }
}

/// 定时开关机能力
#[async_trait]
pub trait ScheduledPowerDriver: Send + Sync {
    /// `tm` 形如 "HH:MM"
    async fn auto_start(&self, command_id: i64, origin_sn: &str, tm: &str, enable: bool)
    -> Result<()>;

    async fn auto_shut(&self, command_id: i64, origin_sn: &str, tm: &str, enable: bool)
    -> Result<()>;
}
