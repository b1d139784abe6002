//! 重试策略：一个值类型，由“错误分类器 + 可重试分类集合 + 退避函数”组成，
//! 分片级与整文件级重试共用同一套执行逻辑。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::internal::config::sync_config::SyncConfig;
use crate::internal::errors::error_class::ErrorClass;
use crate::internal::errors::sync_error::{Result, SyncError};

/// 错误分类函数。
pub type Classifier = fn(&SyncError) -> ErrorClass;

/// 指数退避：`min(base * 2^attempt + jitter, max)`，`jitter` 在 `[0, jitter]` 内均匀随机。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Backoff {
    /// 不等待，立即重试。
    pub const fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// 第 `attempt` 次重试（从 0 计）前的等待时间。
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(30));
        let exp = self.base.saturating_mul(factor);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        exp.saturating_add(jitter).min(self.max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 首次尝试之外的最大重试次数
    pub max_retries: u32,
    pub backoff: Backoff,
    classifier: Classifier,
    retry_on: &'static [ErrorClass],
}

const CHUNK_RETRY_ON: &[ErrorClass] = &[ErrorClass::Transient, ErrorClass::Integrity];
const FILE_RETRY_ON: &[ErrorClass] = &[ErrorClass::Integrity];

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        backoff: Backoff,
        classifier: Classifier,
        retry_on: &'static [ErrorClass],
    ) -> Self {
        Self {
            max_retries,
            backoff,
            classifier,
            retry_on,
        }
    }

    /// 分片级：瞬时网络错误与分片校验失败可重试，带指数退避。
    pub fn for_chunks(max_retries: u32, backoff: Backoff) -> Self {
        Self::new(max_retries, backoff, SyncError::class, CHUNK_RETRY_ON)
    }

    /// 整文件级：只有整文件校验失败可重试，立即从头再来。
    pub fn for_whole_file(max_file_retries: u32) -> Self {
        Self::new(max_file_retries, Backoff::none(), SyncError::class, FILE_RETRY_ON)
    }

    pub fn chunks_from_config(config: &SyncConfig) -> Self {
        Self::for_chunks(
            config.max_retries,
            Backoff {
                base: Duration::from_millis(config.retry_base_delay_ms),
                max: Duration::from_millis(config.retry_max_delay_ms),
                jitter: Duration::from_millis(config.retry_jitter_ms),
            },
        )
    }

    pub fn classify(&self, error: &SyncError) -> ErrorClass {
        (self.classifier)(error)
    }

    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        self.retry_on.contains(&class)
    }

    /// 第 `attempt` 次失败（从 0 计）之后是否还应重试。
    pub fn should_retry(&self, error: &SyncError, attempt: u32) -> bool {
        attempt < self.max_retries && self.is_retryable(self.classify(error))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// 执行 `op` 直到成功、遇到不可重试的错误或重试耗尽。
    ///
    /// `op` 收到当前尝试序号（从 0 计）。退避等待可被 `cancel` 中断。
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !self.should_retry(&error, attempt) {
                return Err(error);
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                op = label,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "操作失败，准备重试"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            }
            attempt += 1;
        }
    }
}
