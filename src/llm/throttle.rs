//! 客户端限速：保证同一后端两次请求之间的最小间隔
//!
//! 记录上次调用时刻；新调用前若间隔不足则 sleep 补齐。锁在等待期间持有，
//! 因此所有任务共享同一后端时也按顺序排队，不会同时放行。

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// 等待直到距上次调用至少 min_interval，然后登记本次调用时刻
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "throttling backend call");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
