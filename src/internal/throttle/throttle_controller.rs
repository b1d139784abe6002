//! 令牌桶限速：容量等于每秒字节数，按实际经过的时间连续补充（不按固定 tick，避免漂移）。
//!
//! 排队顺序由一把异步互斥锁（`tokio::sync::Mutex` 本身是公平队列）决定：
//! 只有队首的请求在等待令牌，后来者排在它后面，因此不会饿死。
//! 桶本身由一把同步锁保护，只在计算时短暂持有，从不跨 `.await`。

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::internal::errors::sync_error::{Result, SyncError};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct ThrottleController {
    /// `None` 表示不限速
    rate: Option<f64>,
    bucket: StdMutex<Bucket>,
    turnstile: TokioMutex<()>,
}

impl ThrottleController {
    /// 创建限速器，初始为满桶。
    pub fn new(max_bytes_per_second: Option<u64>) -> Self {
        let rate = max_bytes_per_second.filter(|r| *r > 0).map(|r| r as f64);
        Self {
            rate,
            bucket: StdMutex::new(Bucket {
                tokens: rate.unwrap_or(0.0),
                last_refill: Instant::now(),
            }),
            turnstile: TokioMutex::new(()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn is_limited(&self) -> bool {
        self.rate.is_some()
    }

    /// 当前可用令牌数（补充之后）。不限速时返回 `None`。
    pub fn available(&self) -> Option<u64> {
        let rate = self.rate?;
        let mut bucket = self.lock_bucket();
        Self::refill(&mut bucket, rate, Instant::now());
        Some(bucket.tokens.max(0.0) as u64)
    }

    /// 挂起直到获得 `bytes` 个令牌。
    ///
    /// 超过桶容量的请求按容量拆成多次扣减，只会等得更久，不会被拒绝；
    /// 只有 `cancel` 能中断等待，中断时已扣除的令牌不退还。
    pub async fn acquire(&self, bytes: u64, cancel: &CancellationToken) -> Result<()> {
        let Some(rate) = self.rate else {
            return Ok(());
        };
        if bytes == 0 {
            return Ok(());
        }

        let _turn = tokio::select! {
            guard = self.turnstile.lock() => guard,
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        };

        let mut remaining = bytes as f64;
        while remaining > 0.0 {
            let want = remaining.min(rate);
            loop {
                let wait = {
                    let mut bucket = self.lock_bucket();
                    Self::refill(&mut bucket, rate, Instant::now());
                    if bucket.tokens >= want {
                        bucket.tokens -= want;
                        None
                    } else {
                        Some(Duration::from_secs_f64((want - bucket.tokens) / rate))
                    }
                };
                let Some(wait) = wait else {
                    break;
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                }
            }
            remaining -= want;
        }
        Ok(())
    }

    fn refill(bucket: &mut Bucket, rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * rate).min(rate);
            bucket.last_refill = now;
        }
    }

    fn lock_bucket(&self) -> std::sync::MutexGuard<'_, Bucket> {
        match self.bucket.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
