//! 指令下发
//!
//! 业务侧的统一下发入口：定位设备、找到对应厂商驱动、铸一个指令 id、
//! 登记待应答关联，再交给驱动编码发送。下发本身是发完即返回，
//! 执行结果由消息处理器按指令 id 异步关联回发起终端。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::info;

use crate::domain::models::{Command, TerminalKey, actions};
use crate::domain::repository::Repository;
use crate::error::{GatewayError, Result};
use crate::infrastructure::command_tracker::CommandTracker;
use crate::vendors::DriverRegistry;

/// 校验通过后的下发计划
enum Plan {
    Locate,
    Reboot,
    PowerOff,
    Find,
    SetReportInterval(i32),
    AutoStart { tm: String, enable: bool },
    AutoShut { tm: String, enable: bool },
}

pub struct CommandService {
    repository: Arc<dyn Repository>,
    registry: Arc<DriverRegistry>,
    tracker: Arc<CommandTracker>,
    next_id: AtomicI64,
}

impl CommandService {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<DriverRegistry>,
        tracker: Arc<CommandTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            registry,
            tracker,
            // 以毫秒时间戳起步，重启后不会与上一轮进程撞 id
            next_id: AtomicI64::new(Utc::now().timestamp_millis()),
        })
    }

    /// 下发一条指令，返回用于关联应答的指令 id。
    /// `terminal` 存在时登记待应答关联，应答回来推给这个终端。
    pub async fn execute(
        &self,
        device_id: &str,
        action: &str,
        args: Vec<String>,
        terminal: Option<TerminalKey>,
    ) -> Result<i64> {
        let record = self.repository.device_by_id(device_id).await?;
        let device_type = record.device_type.ok_or_else(|| {
            GatewayError::InvalidCommand(format!("device {device_id} has no vendor type"))
        })?;
        let driver = self.registry.get(device_type)?;
        let plan = parse_plan(action, &args)?;
        if matches!(plan, Plan::AutoStart { .. } | Plan::AutoShut { .. })
            && driver.scheduled_power().is_none()
        {
            return Err(GatewayError::InvalidCommand(format!(
                "{device_type} does not support scheduled power"
            )));
        }

        let command_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(terminal) = terminal {
            // 先登记后发送，避免极快的应答抢在登记之前到达
            self.tracker
                .add(
                    command_id,
                    terminal,
                    Command {
                        action: action.to_string(),
                        args: args.clone(),
                        result: None,
                    },
                )
                .await;
        }

        let sn = record.origin_sn.as_str();
        info!(device_id, command_id, action, origin_sn = sn, "dispatching command");
        match plan {
            Plan::Locate => driver.locate(command_id, sn).await?,
            Plan::Reboot => driver.reboot(command_id, sn).await?,
            Plan::PowerOff => driver.power_off(command_id, sn).await?,
            Plan::Find => driver.find(command_id, sn).await?,
            Plan::SetReportInterval(secs) => {
                driver.set_report_interval(command_id, sn, secs).await?
            }
            Plan::AutoStart { tm, enable } => {
                // 上面已经检查过能力存在
                if let Some(sp) = driver.scheduled_power() {
                    sp.auto_start(command_id, sn, &tm, enable).await?;
                }
            }
            Plan::AutoShut { tm, enable } => {
                if let Some(sp) = driver.scheduled_power() {
                    sp.auto_shut(command_id, sn, &tm, enable).await?;
                }
            }
        }
        Ok(command_id)
    }
}

fn parse_plan(action: &str, args: &[String]) -> Result<Plan> {
    match action {
        actions::LOCATE => Ok(Plan::Locate),
        actions::REBOOT => Ok(Plan::Reboot),
        actions::POWER_OFF => Ok(Plan::PowerOff),
        actions::FIND => Ok(Plan::Find),
        actions::SET_REPORT_INTERVAL => {
            let secs: i32 = args
                .first()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    GatewayError::InvalidCommand("interval requires seconds argument".into())
                })?;
            if secs <= 0 {
                return Err(GatewayError::InvalidCommand(format!(
                    "interval must be positive, got {secs}"
                )));
            }
            Ok(Plan::SetReportInterval(secs))
        }
        actions::AUTO_START | actions::AUTO_SHUT => {
            let [tm, enable] = args else {
                return Err(GatewayError::InvalidCommand(
                    "scheduled power requires time and enable flag".into(),
                ));
            };
            let plan = if action == actions::AUTO_START {
                Plan::AutoStart {
                    tm: tm.clone(),
                    enable: enable == "1",
                }
            } else {
                Plan::AutoShut {
                    tm: tm.clone(),
                    enable: enable == "1",
                }
            };
            Ok(plan)
        }
        other => Err(GatewayError::InvalidCommand(format!(
            "unsupported action: {other}"
        ))),
    }
}
