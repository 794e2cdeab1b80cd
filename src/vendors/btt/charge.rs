//! 充电状态滞回滤波
//!
//! 硬件不上报充电位，只能从电量样本的变化趋势推断。样本噪声大，
//! 所以引入置信度累积：连续多次小幅上升才确认充电，下降两次即确认
//! 放电（放电的确认门槛低于充电）。同时兼顾电量滤波：只有置信度到达
//! 确认态时才采信新电量作为基线，争议区间内对外报告的电量保持不变。
//!
//! 状态随设备序列号持久化在本地缓存里，进程重启不会把滤波器归零。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infrastructure::cache::LocalCache;

const CHARGE_NAMESPACE: &str = "btt_elect";

/// 充电置信状态
///
/// 转移表（小幅变化指 |Δ| ≤ 5）：
/// - 小幅上升：Discharging → Leaning(1) → Leaning(2) → Charging
/// - 小幅下降：Charging → Leaning(2) → Discharging；Leaning(1) 保持
/// - Δ > 5：直接置 Charging
/// - Δ == 0 且处于延迟充电态：衰减一级，衰减穿过 Leaning(1) 时落回 Discharging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeState {
    Discharging,
    /// 倾向充电但未确认，参数是已累积的置信级（1 或 2）
    Leaning(u8),
    Charging,
}

impl ChargeState {
    fn stepped_up(self) -> Self {
        match self {
            ChargeState::Discharging => ChargeState::Leaning(1),
            ChargeState::Leaning(1) => ChargeState::Leaning(2),
            ChargeState::Leaning(_) | ChargeState::Charging => ChargeState::Charging,
        }
    }

    fn stepped_down(self) -> Self {
        match self {
            ChargeState::Charging => ChargeState::Leaning(2),
            ChargeState::Leaning(2) => ChargeState::Discharging,
            other => other,
        }
    }

    fn decayed(self) -> Self {
        match self {
            ChargeState::Charging => ChargeState::Leaning(2),
            _ => ChargeState::Discharging,
        }
    }
}

/// 每台设备的隐藏状态：已采信的电量基线、采信时刻、置信状态和延迟充电位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeTrack {
    pub percent: i32,
    pub at: DateTime<Utc>,
    pub state: ChargeState,
    /// 对外报告的充电布尔值：确认充电后置位，确认放电前一直保持
    pub lazy: bool,
}

impl ChargeTrack {
    fn seed(percent: i32, now: DateTime<Utc>) -> Self {
        Self {
            percent,
            at: now,
            state: ChargeState::Discharging,
            lazy: false,
        }
    }
}

/// 推进一个样本
///
/// 置信模型：
/// - 距上次采信 ≤ 1 分钟且 |Δ| ≤ 5：视为噪声，整个样本不采信
/// - 距上次采信 ≥ 120 分钟，或 Δ ≤ -5：直接采信电量，但长间隔不构成
///   充放电证据，置信状态不动
/// - 其余为争议区间：按转移表推进置信状态，只有到达确认态
///   （Charging / Discharging）时才把新电量采信为基线
fn advance(track: &mut ChargeTrack, percent: i32, now: DateTime<Utc>) {
    let minutes = (now - track.at).num_seconds() as f64 / 60.0;
    let delta = percent - track.percent;

    if minutes <= 1.0 && delta.abs() <= 5 {
        return;
    }
    if minutes >= 120.0 || delta <= -5 {
        track.percent = percent;
        track.at = now;
        return;
    }

    if delta == 0 && track.lazy {
        track.state = track.state.decayed();
        if track.state == ChargeState::Discharging {
            track.lazy = false;
        }
    } else if delta > 5 {
        track.state = ChargeState::Charging;
        track.lazy = true;
    } else if delta > 0 {
        track.state = track.state.stepped_up();
        if track.state == ChargeState::Charging {
            track.lazy = true;
        }
    } else if delta < 0 {
        track.state = track.state.stepped_down();
        if track.state == ChargeState::Discharging {
            track.lazy = false;
        }
    }

    if matches!(track.state, ChargeState::Charging | ChargeState::Discharging) {
        track.percent = percent;
        track.at = now;
    }
}

pub struct ChargeFilter {
    cache: Arc<LocalCache>,
}

impl ChargeFilter {
    pub fn new(cache: Arc<LocalCache>) -> Self {
        Self { cache }
    }

    /// 喂入一个电量样本，返回 (充电布尔, 滤波后电量)
    pub async fn filter(&self, origin_sn: &str, percent: i32) -> (bool, i32) {
        let now = Utc::now();
        let mut track = self
            .cache
            .get::<ChargeTrack>(CHARGE_NAMESPACE, origin_sn)
            .await
            .unwrap_or_else(|| ChargeTrack::seed(percent, now));
        advance(&mut track, percent, now);
        self.cache.set(CHARGE_NAMESPACE, origin_sn, &track).await;
        (track.lazy, track.percent)
    }
}
