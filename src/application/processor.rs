//! 消息处理器
//!
//! 所有厂商上行的汇聚点。一条消息的处理分三步：解析设备身份（唯一
//! 致命步骤）、留档原始报文（尽力而为）、按内容走设备状态分支或
//! 指令应答分支。除身份解析外任何一步失败都只记日志，绝不让单条
//! 报文把处理器拖垮。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::models::{
    Alarm, AlarmKind, CommandResult, DevicePatch, DeviceStatus, DeviceType, FixKind, Location,
    actions,
};
use crate::domain::repository::Repository;
use crate::error::Result;
use crate::infrastructure::command_tracker::{CommandTracker, PendingCommand};
use crate::interface::ws::{WsFrame, WsManager};
use crate::vendors::{StatusHandler, SubscriptionProvider};

/// 低电量报警阈值（百分比）
const LOW_BATTERY_THRESHOLD: i32 = 20;
/// 无卫星数等历史轨迹缺省精度（米）
const COARSE_ACCURACY: f64 = 1000.0;

pub struct MessageProcessor {
    repository: Arc<dyn Repository>,
    ws: Arc<WsManager>,
    tracker: Arc<CommandTracker>,
}

impl MessageProcessor {
    pub fn new(
        repository: Arc<dyn Repository>,
        ws: Arc<WsManager>,
        tracker: Arc<CommandTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            ws,
            tracker,
        })
    }

    async fn process_device(&self, device_id: &str, mut patch: DevicePatch) {
        if let Some(electricity) = patch.electricity {
            if electricity < LOW_BATTERY_THRESHOLD {
                // 每条低电量心跳独立报警，不做去重
                let alarm = Alarm {
                    device_id: device_id.to_string(),
                    kind: AlarmKind::LowBattery,
                    msg: format!("{electricity}%"),
                    time: Utc::now(),
                };
                if let Err(e) = self.repository.append_alarm(alarm).await {
                    warn!(device_id, error = %e, "low battery alarm not persisted");
                }
            }
        }
        if let Some(steps) = patch.steps {
            if let Err(e) = self.repository.append_step_sample(device_id, steps).await {
                warn!(device_id, error = %e, "step sample not persisted");
            }
        }

        if patch.fix_failed() {
            // 失败定位绝不落档案绝不通知，只更新最后通信时间等非定位字段
            patch.clear_fix_fields();
            if let Err(e) = self
                .repository
                .apply_device_patch(device_id, patch.to_update_map())
                .await
            {
                warn!(device_id, error = %e, "device patch not persisted");
            }
            return;
        }

        let record = match self
            .repository
            .apply_device_patch(device_id, patch.to_update_map())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id, error = %e, "device patch not persisted");
                return;
            }
        };

        self.notify_watchers(device_id, &WsFrame::device_update(&record))
            .await;

        let loc = location_of(&patch);
        if let Err(e) = self
            .repository
            .append_position_history(device_id, &loc)
            .await
        {
            warn!(device_id, error = %e, "position history not persisted");
        }
    }

    /// 推送给设备主人及所有被分享的用户
    async fn notify_watchers(&self, device_id: &str, frame: &WsFrame) {
        let mut users = match self.repository.owning_user(device_id).await {
            Ok(owner) => vec![owner],
            Err(e) => {
                warn!(device_id, error = %e, "owning user not resolvable");
                vec![]
            }
        };
        match self.repository.shared_users(device_id).await {
            Ok(shared) => users.extend(shared),
            Err(e) => warn!(device_id, error = %e, "shared users not resolvable"),
        }
        if users.is_empty() {
            return;
        }
        if let Err(e) = self.ws.broadcast_to_users(&users, frame).await {
            warn!(device_id, error = %e, "device update not fully delivered");
        }
    }

    async fn process_command_result(&self, device_id: &str, result: &CommandResult) {
        let Some(pending) = self.tracker.get_and_remove(result.command_id).await else {
            // 迟到或重复的应答：静默丢弃
            debug!(
                device_id,
                command_id = result.command_id,
                "unmatched command reply dropped"
            );
            return;
        };

        info!(
            device_id,
            command_id = result.command_id,
            action = %pending.command.action,
            succeed = result.succeed,
            "command reply matched"
        );

        // 只回发起指令的那个终端，不广播
        if let Err(e) = self
            .ws
            .push_msg(&pending.terminal, &WsFrame::command_result(result))
            .await
        {
            warn!(
                terminal = %pending.terminal,
                command_id = result.command_id,
                error = %e,
                "command result not delivered"
            );
        }

        if result.succeed {
            self.apply_deferred_setting(device_id, &pending).await;
        }
    }

    /// 定时开关机这类设置项要等设备确认执行成功才写库
    async fn apply_deferred_setting(&self, device_id: &str, pending: &PendingCommand) {
        let (at_key, enable_key) = match pending.command.action.as_str() {
            actions::AUTO_START => ("auto_start_at", "auto_start_enable"),
            actions::AUTO_SHUT => ("auto_shut_at", "auto_shut_enable"),
            _ => return,
        };
        let [tm, enable] = pending.command.args.as_slice() else {
            warn!(
                device_id,
                action = %pending.command.action,
                "scheduled power command with malformed args"
            );
            return;
        };

        let mut fields = serde_json::Map::new();
        fields.insert("device_id".into(), serde_json::json!(device_id));
        fields.insert(at_key.into(), serde_json::json!(tm));
        fields.insert(enable_key.into(), serde_json::json!(enable == "1"));
        if let Err(e) = self.repository.upsert_schedule_setting(fields).await {
            warn!(device_id, error = %e, "schedule setting not persisted");
        }
    }
}

/// 从已确认成功的定位补丁导出轨迹点，缺省字段按粗粒度兜底
fn location_of(patch: &DevicePatch) -> Location {
    Location {
        address: patch.address.clone().unwrap_or_default(),
        longitude: patch.longitude.unwrap_or_default(),
        latitude: patch.latitude.unwrap_or_default(),
        altitude: patch.altitude.unwrap_or_default(),
        satellites: patch.satellites.unwrap_or_default(),
        kind: patch.fix_kind.unwrap_or(FixKind::Lbs),
        fix_time: patch.fix_time.unwrap_or_else(Utc::now),
        accuracy: patch.accuracy.unwrap_or(COARSE_ACCURACY),
        speed: patch.speed.unwrap_or_default(),
        heading: patch.heading.unwrap_or_default(),
    }
}

#[async_trait]
impl StatusHandler for MessageProcessor {
    async fn handle(&self, status: DeviceStatus) -> Result<()> {
        // 唯一致命步骤：身份解析不出来整条消息中止
        let device_id = self
            .repository
            .device_id_by_origin_sn(&status.origin_sn, status.device_type)
            .await?;

        if let Err(e) = self
            .repository
            .append_history_raw(&device_id, &status.raw)
            .await
        {
            warn!(device_id, error = %e, "raw payload not archived");
        }

        if let Some(patch) = status.device {
            self.process_device(&device_id, patch).await;
        }
        if let Some(result) = status.command.as_ref().and_then(|c| c.result.as_ref()) {
            self.process_command_result(&device_id, result).await;
        }
        Ok(())
    }
}

/// 驱动启动时按厂商列订阅清单
#[async_trait]
impl SubscriptionProvider for MessageProcessor {
    async fn origin_sns(&self, device_type: DeviceType) -> Result<Vec<String>> {
        let devices = self.repository.devices_by_type(device_type).await?;
        Ok(devices.into_iter().map(|d| d.origin_sn).collect())
    }
}
