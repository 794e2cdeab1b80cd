//! 基于令牌桶算法的服务商限流
//!
//! 融合定位与逆地址解析各自独立的桶：服务商对两类接口的免费配额不同。

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{GatewayError, Result};

struct BucketState {
    /// 当前令牌数
    tokens: f64,
    /// 上次填充时间
    last_update: Instant,
}

/// 令牌桶，可被任意多个并发调用方安全使用
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// 最大令牌数
    capacity: f64,
    /// 令牌填充速率（每秒）
    refill_rate: f64,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    /// 按 qps 建桶：桶大小与速率一致
    pub fn per_second(qps: u32) -> Self {
        let qps = qps.max(1) as f64;
        Self::new(qps, qps)
    }

    /// 在 deadline 前等到一个令牌，等不到则算作一次服务商失败
    pub async fn acquire(&self, deadline: Instant) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_update).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
                state.last_update = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // 距离下一个令牌产生还需要的时间
                (1.0 - state.tokens) / self.refill_rate
            };
            let wake = Instant::now() + Duration::from_secs_f64(wait);
            if wake > deadline {
                return Err(GatewayError::Timeout(
                    "timed out while waiting for rate limit token".to_string(),
                ));
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}
