//! 驱动注册表
//!
//! 按设备类型做运行时查找。注册发生在装配期，之后只读。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::domain::models::DeviceType;
use crate::error::{GatewayError, Result};
use crate::vendors::VendorDriver;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<DeviceType, Arc<dyn VendorDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn VendorDriver>) -> Result<()> {
        let device_type = driver.device_type();
        if self.drivers.contains_key(&device_type) {
            return Err(GatewayError::Driver(format!(
                "driver already registered: {device_type}"
            )));
        }
        self.drivers.insert(device_type, driver);
        Ok(())
    }

    pub fn get(&self, device_type: DeviceType) -> Result<Arc<dyn VendorDriver>> {
        self.drivers
            .get(&device_type)
            .cloned()
            .ok_or_else(|| GatewayError::Driver(format!("no driver for: {device_type}")))
    }

    /// 设备绑定后开始接收其上行
    pub async fn activate(&self, device_type: DeviceType, origin_sn: &str) -> Result<()> {
        self.get(device_type)?.activate(origin_sn).await
    }

    /// 解绑后停止接收
    pub async fn deactivate(&self, device_type: DeviceType, origin_sn: &str) -> Result<()> {
        self.get(device_type)?.deactivate(origin_sn).await
    }

    /// 逐个启动已注册驱动；单个失败不影响其他厂商上线
    pub async fn start_all(&self) {
        for (device_type, driver) in &self.drivers {
            match driver.start().await {
                Ok(()) => info!(vendor = %device_type, "vendor driver started"),
                Err(e) => error!(vendor = %device_type, error = %e, "vendor driver failed to start"),
            }
        }
    }
}
