//! 数据访问接口
//!
//! 核心只依赖这个窄接口，关系型实现属于外部协作者。

use async_trait::async_trait;

use crate::domain::models::{Alarm, DeviceRecord, DeviceType, Location};
use crate::error::Result;

#[async_trait]
pub trait Repository: Send + Sync {
    /// 原厂序列号 + 厂商类型 映射到统一设备 id
    async fn device_id_by_origin_sn(&self, origin_sn: &str, device_type: DeviceType)
    -> Result<String>;

    async fn device_by_id(&self, id: &str) -> Result<DeviceRecord>;

    /// 订阅清单需要按厂商列出当前已分配的设备
    async fn devices_by_type(&self, device_type: DeviceType) -> Result<Vec<DeviceRecord>>;

    /// 按字段表做稀疏更新，返回更新后的完整记录
    async fn apply_device_patch(
        &self,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<DeviceRecord>;

    /// 原始报文留档
    async fn append_history_raw(&self, id: &str, raw: &[u8]) -> Result<()>;

    async fn append_position_history(&self, id: &str, loc: &Location) -> Result<()>;

    async fn append_step_sample(&self, id: &str, steps: i64) -> Result<()>;

    async fn append_alarm(&self, alarm: Alarm) -> Result<()>;

    async fn owning_user(&self, id: &str) -> Result<u64>;

    async fn shared_users(&self, id: &str) -> Result<Vec<u64>>;

    /// 定时开关机等延迟生效的设置项
    async fn upsert_schedule_setting(
        &self,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;
}
