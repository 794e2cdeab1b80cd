//! 内存数据访问实现
//!
//! 单机部署和测试用。生产的关系型实现在外部服务里，这里保证接口语义
//! 一致：稀疏更新、共享用户、轨迹与报警留档。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::models::{Alarm, DeviceRecord, DeviceType, Location};
use crate::domain::repository::Repository;
use crate::error::{GatewayError, Result};

use async_trait::async_trait;

#[derive(Default)]
struct State {
    devices: HashMap<String, DeviceRecord>,
    /// (origin_sn, device_type) -> 设备 id
    by_origin: HashMap<(String, DeviceType), String>,
    raw_history: HashMap<String, Vec<Vec<u8>>>,
    positions: HashMap<String, Vec<Location>>,
    steps: HashMap<String, Vec<i64>>,
    alarms: Vec<Alarm>,
    shares: HashMap<String, Vec<u64>>,
    schedule_settings: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(State::default()),
        })
    }

    /// 录入一条设备记录（绑定关系由外部系统维护，这里直接写入）
    pub async fn insert_device(&self, record: DeviceRecord) {
        let mut state = self.state.write().await;
        if let Some(device_type) = record.device_type {
            state
                .by_origin
                .insert((record.origin_sn.clone(), device_type), record.id.clone());
        }
        state.devices.insert(record.id.clone(), record);
    }

    pub async fn share_device(&self, id: &str, user_id: u64) {
        let mut state = self.state.write().await;
        state.shares.entry(id.to_string()).or_default().push(user_id);
    }

    pub async fn alarms(&self) -> Vec<Alarm> {
        self.state.read().await.alarms.clone()
    }

    pub async fn positions(&self, id: &str) -> Vec<Location> {
        self.state
            .read()
            .await
            .positions
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn step_samples(&self, id: &str) -> Vec<i64> {
        self.state
            .read()
            .await
            .steps
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn raw_history(&self, id: &str) -> Vec<Vec<u8>> {
        self.state
            .read()
            .await
            .raw_history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn schedule_setting(
        &self,
        device_id: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.state
            .read()
            .await
            .schedule_settings
            .get(device_id)
            .cloned()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn device_id_by_origin_sn(
        &self,
        origin_sn: &str,
        device_type: DeviceType,
    ) -> Result<String> {
        self.state
            .read()
            .await
            .by_origin
            .get(&(origin_sn.to_string(), device_type))
            .cloned()
            .ok_or_else(|| {
                GatewayError::Identity(format!("no device bound to {device_type}/{origin_sn}"))
            })
    }

    async fn device_by_id(&self, id: &str) -> Result<DeviceRecord> {
        self.state
            .read()
            .await
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Persistence(format!("device not found: {id}")))
    }

    async fn devices_by_type(&self, device_type: DeviceType) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.device_type == Some(device_type))
            .cloned()
            .collect())
    }

    async fn apply_device_patch(
        &self,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<DeviceRecord> {
        let mut state = self.state.write().await;
        let record = state
            .devices
            .get(id)
            .ok_or_else(|| GatewayError::Persistence(format!("device not found: {id}")))?;
        let mut value = serde_json::to_value(record)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| GatewayError::Persistence("device record is not an object".into()))?;
        for (key, val) in fields {
            // 补丁侧字段名与记录侧一致，唯独 device_type 的列名是 type
            let key = if key == "device_type" {
                "type".to_string()
            } else {
                key
            };
            // 身份字段不允许被补丁改写
            if key == "id" || key == "origin_sn" || key == "user_id" {
                continue;
            }
            obj.insert(key, val);
        }
        let updated: DeviceRecord = serde_json::from_value(value)?;
        state.devices.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn append_history_raw(&self, id: &str, raw: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .raw_history
            .entry(id.to_string())
            .or_default()
            .push(raw.to_vec());
        Ok(())
    }

    async fn append_position_history(&self, id: &str, loc: &Location) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .positions
            .entry(id.to_string())
            .or_default()
            .push(loc.clone());
        Ok(())
    }

    async fn append_step_sample(&self, id: &str, steps: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.steps.entry(id.to_string()).or_default().push(steps);
        Ok(())
    }

    async fn append_alarm(&self, alarm: Alarm) -> Result<()> {
        self.state.write().await.alarms.push(alarm);
        Ok(())
    }

    async fn owning_user(&self, id: &str) -> Result<u64> {
        let state = self.state.read().await;
        state
            .devices
            .get(id)
            .and_then(|d| d.user_id)
            .ok_or_else(|| GatewayError::Persistence(format!("device has no owner: {id}")))
    }

    async fn shared_users(&self, id: &str) -> Result<Vec<u64>> {
        Ok(self
            .state
            .read()
            .await
            .shares
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_schedule_setting(
        &self,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let device_id = fields
            .get("device_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Persistence("schedule setting without device_id".into()))?
            .to_string();
        let mut state = self.state.write().await;
        match state.schedule_settings.get_mut(&device_id) {
            Some(existing) => existing.extend(fields),
            None => {
                state.schedule_settings.insert(device_id, fields);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DevicePatch;

    fn record(id: &str, sn: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            origin_sn: sn.to_string(),
            device_type: Some(DeviceType::Btt),
            user_id: Some(7),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_origin_sn_lookup_is_scoped_by_type() {
        let repo = MemoryRepository::new();
        repo.insert_device(record("d1", "sn-1")).await;

        assert_eq!(
            repo.device_id_by_origin_sn("sn-1", DeviceType::Btt).await.unwrap(),
            "d1"
        );
        assert!(
            repo.device_id_by_origin_sn("sn-1", DeviceType::V53)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_patch_updates_only_given_fields() {
        let repo = MemoryRepository::new();
        repo.insert_device(DeviceRecord {
            electricity: Some(90),
            address: Some("old".into()),
            ..record("d1", "sn-1")
        })
        .await;

        let patch = DevicePatch {
            electricity: Some(40),
            charging: Some(true),
            ..Default::default()
        };
        let updated = repo.apply_device_patch("d1", patch.to_update_map()).await.unwrap();
        assert_eq!(updated.electricity, Some(40));
        assert_eq!(updated.charging, Some(true));
        // 未出现在补丁里的字段保持原值
        assert_eq!(updated.address.as_deref(), Some("old"));
        assert_eq!(updated.user_id, Some(7));
    }

    #[tokio::test]
    async fn test_patch_cannot_rewrite_identity() {
        let repo = MemoryRepository::new();
        repo.insert_device(record("d1", "sn-1")).await;

        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), serde_json::json!("evil"));
        fields.insert("electricity".into(), serde_json::json!(5));
        let updated = repo.apply_device_patch("d1", fields).await.unwrap();
        assert_eq!(updated.id, "d1");
        assert_eq!(updated.electricity, Some(5));
    }

    #[tokio::test]
    async fn test_schedule_setting_upsert_merges() {
        let repo = MemoryRepository::new();
        let mut first = serde_json::Map::new();
        first.insert("device_id".into(), serde_json::json!("d1"));
        first.insert("auto_start_at".into(), serde_json::json!("08:00"));
        first.insert("auto_start_enable".into(), serde_json::json!(true));
        repo.upsert_schedule_setting(first).await.unwrap();

        let mut second = serde_json::Map::new();
        second.insert("device_id".into(), serde_json::json!("d1"));
        second.insert("auto_shut_at".into(), serde_json::json!("22:00"));
        repo.upsert_schedule_setting(second).await.unwrap();

        let merged = repo.schedule_setting("d1").await.unwrap();
        assert_eq!(merged.get("auto_start_at"), Some(&serde_json::json!("08:00")));
        assert_eq!(merged.get("auto_shut_at"), Some(&serde_json::json!("22:00")));
    }

    #[tokio::test]
    async fn test_shared_users_defaults_empty() {
        let repo = MemoryRepository::new();
        repo.insert_device(record("d1", "sn-1")).await;
        assert!(repo.shared_users("d1").await.unwrap().is_empty());

        repo.share_device("d1", 11).await;
        repo.share_device("d1", 12).await;
        assert_eq!(repo.shared_users("d1").await.unwrap(), vec![11, 12]);
    }
}
