//! BTT MQTT 驱动
//!
//! 每台设备两个话题：`dwq/device/hy/{sn}/` 是设备消费的指令下行，
//! `dwq/app/hy/{sn}/` 是数据上报。QoS 1，保持会话，断线由事件循环
//! 自动重连。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::adapter::BttAdapter;
use super::message::{self, Envelope};
use crate::config::MqttConfig;
use crate::domain::models::{DevicePatch, DeviceType, FixKind};
use crate::error::{GatewayError, Result};
use crate::vendors::{StatusHandler, SubscriptionProvider, VendorDriver};

const CMD_TOPIC_PREFIX: &str = "dwq/device/hy";
const REPORT_TOPIC_PREFIX: &str = "dwq/app/hy";

pub struct BttDriver {
    client: AsyncClient,
    /// start 时取走，驱动只能启动一次
    event_loop: Mutex<Option<EventLoop>>,
    adapter: Arc<BttAdapter>,
    handler: Arc<dyn StatusHandler>,
    subscriptions: Arc<dyn SubscriptionProvider>,
}

impl BttDriver {
    pub fn new(
        cfg: &MqttConfig,
        adapter: Arc<BttAdapter>,
        handler: Arc<dyn StatusHandler>,
        subscriptions: Arc<dyn SubscriptionProvider>,
    ) -> Arc<Self> {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.broker.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(10));
        options.set_clean_session(false);
        if !cfg.username.is_empty() {
            options.set_credentials(cfg.username.clone(), cfg.password.clone());
        }
        let (client, event_loop) = AsyncClient::new(options, 64);

        Arc::new(Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            adapter,
            handler,
            subscriptions,
        })
    }

    async fn subscribe_device(&self, origin_sn: &str) -> Result<()> {
        for topic in [command_topic(origin_sn), report_topic(origin_sn)] {
            self.client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| GatewayError::Transport(format!("mqtt subscribe failed: {e}")))?;
        }
        Ok(())
    }

    async fn unsubscribe_device(&self, origin_sn: &str) -> Result<()> {
        for topic in [command_topic(origin_sn), report_topic(origin_sn)] {
            self.client
                .unsubscribe(topic)
                .await
                .map_err(|e| GatewayError::Transport(format!("mqtt unsubscribe failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VendorDriver for BttDriver {
    fn device_type(&self) -> DeviceType {
        DeviceType::Btt
    }

    async fn start(&self) -> Result<()> {
        let Some(mut event_loop) = self.event_loop.lock().await.take() else {
            return Err(GatewayError::Driver("btt driver already started".into()));
        };

        let sns = self.subscriptions.origin_sns(DeviceType::Btt).await?;
        for sn in &sns {
            self.subscribe_device(sn).await?;
        }
        info!(devices = sns.len(), "btt subscription roster loaded");

        let client = self.client.clone();
        let adapter = Arc::clone(&self.adapter);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let client = client.clone();
                        let adapter = Arc::clone(&adapter);
                        let handler = Arc::clone(&handler);
                        let topic = publish.topic.clone();
                        let payload = publish.payload.to_vec();
                        tokio::spawn(async move {
                            handle_publish(client, adapter, handler, topic, payload).await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt connection error, will reconnect");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
        Ok(())
    }

    async fn activate(&self, origin_sn: &str) -> Result<()> {
        self.subscribe_device(origin_sn).await
    }

    async fn deactivate(&self, origin_sn: &str) -> Result<()> {
        self.unsubscribe_device(origin_sn).await
    }

    async fn locate(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        publish(&self.client, origin_sn, locate_message(command_id)).await
    }

    async fn reboot(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        publish(&self.client, origin_sn, power_message(command_id, "reboot")).await
    }

    async fn power_off(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        publish(&self.client, origin_sn, power_message(command_id, "off")).await
    }

    async fn find(&self, command_id: i64, origin_sn: &str) -> Result<()> {
        publish(&self.client, origin_sn, find_message(command_id)).await
    }

    async fn set_report_interval(
        &self,
        command_id: i64,
        origin_sn: &str,
        secs: i32,
    ) -> Result<()> {
        publish(&self.client, origin_sn, interval_message(command_id, secs)).await
    }
}

async fn handle_publish(
    client: AsyncClient,
    adapter: Arc<BttAdapter>,
    handler: Arc<dyn StatusHandler>,
    topic: String,
    payload: Vec<u8>,
) {
    debug!(topic, len = payload.len(), "mqtt message received");

    let mut env: Envelope = match serde_json::from_slice(&payload) {
        Ok(env) => env,
        Err(e) => {
            error!(topic, error = %e, "malformed mqtt payload, dropping");
            return;
        }
    };
    let Some(topic_sn) = sn_from_topic(&topic) else {
        warn!(topic, "message from unrecognized topic");
        return;
    };
    if env.device_sn.is_empty() {
        env.device_sn = topic_sn.to_string();
    } else if env.device_sn != topic_sn {
        error!(topic, sn = %env.device_sn, "device sn does not match topic, dropping");
        return;
    }

    let status = adapter.decode(env).await;

    // 紧急模式下的空包自适应：高速模式收不到定位就降速，恢复 GPS 定位就提速
    if let Some(secs) = adjusted_interval(status.device.as_ref()) {
        if let Err(e) = publish(&client, &status.origin_sn, interval_message(0, secs)).await {
            warn!(sn = %status.origin_sn, error = %e, "auto interval adjust failed");
        }
    }

    if let Err(e) = handler.handle(status).await {
        error!(topic, error = %e, "status handling failed");
    }
}

/// 自适应间隔：10s 高速模式下定位失败 → 降到 30s；GPS 定位恢复且处于
/// 10~30s 半高速区间 → 提回 10s。不需要调整时返回 None。
fn adjusted_interval(patch: Option<&DevicePatch>) -> Option<i32> {
    let patch = patch?;
    let interval = patch.interval?;
    if patch.fix_failed() && interval == 10 {
        Some(30)
    } else if !patch.fix_failed()
        && patch.fix_kind == Some(FixKind::Gps)
        && interval > 10
        && interval <= 30
    {
        Some(10)
    } else {
        None
    }
}

async fn publish(client: &AsyncClient, origin_sn: &str, env: Envelope) -> Result<()> {
    client
        .publish(
            command_topic(origin_sn),
            QoS::AtLeastOnce,
            false,
            env.to_bytes(),
        )
        .await
        .map_err(|e| GatewayError::Transport(format!("mqtt publish failed: {e}")))
}

fn command_topic(origin_sn: &str) -> String {
    format!("{CMD_TOPIC_PREFIX}/{origin_sn}/")
}

fn report_topic(origin_sn: &str) -> String {
    format!("{REPORT_TOPIC_PREFIX}/{origin_sn}/")
}

fn sn_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(CMD_TOPIC_PREFIX)
        .or_else(|| topic.strip_prefix(REPORT_TOPIC_PREFIX))?
        .strip_prefix('/')?
        .strip_suffix('/')
}

fn interval_message(command_id: i64, secs: i32) -> Envelope {
    Envelope {
        message_id: command_id,
        data_type: message::SET_REPORT_INTERVAL.into(),
        data: serde_json::json!([{"gpstime": secs.to_string()}]),
        ..Default::default()
    }
}

fn locate_message(command_id: i64) -> Envelope {
    Envelope {
        message_id: command_id,
        data_type: message::LOCATE.into(),
        ..Default::default()
    }
}

fn power_message(command_id: i64, action: &str) -> Envelope {
    Envelope {
        message_id: command_id,
        data_type: message::POWER.into(),
        data: serde_json::json!([{"cmd": "power", "action": action}]),
        ..Default::default()
    }
}

fn find_message(command_id: i64) -> Envelope {
    Envelope {
        message_id: command_id,
        data_type: message::FIND.into(),
        data: serde_json::json!([{"num": "10", "fre": "2500", "pwm": "50", "cishu": "10"}]),
        ..Default::default()
    }
}
