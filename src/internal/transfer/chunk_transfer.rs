//! 单分片传输：Range GET + 单分片超时 + 限速 + 分片级重试。

mod range_request;
mod size_lookup;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::internal::chunking::structs::{ChunkRange, ChunkResult};
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::throttle::throttle_controller::ThrottleController;
use crate::internal::transfer::retry_policy::RetryPolicy;

pub use range_request::CHUNK_CHECKSUM_HEADER;

/// 下载单个分片的参数（形参超过 3 个，用 struct 承载）。
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    pub url: &'a Url,
    pub range: ChunkRange,
    /// 文件总大小，用于判断 200 是否可以当作完整分片接受
    pub total_size: u64,
    /// 元数据给出的分片摘要，优先于响应头
    pub expected_checksum: Option<&'a str>,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ChunkTransfer {
    client: reqwest::Client,
    throttle: Arc<ThrottleController>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ChunkTransfer {
    pub fn new(
        client: reqwest::Client,
        throttle: Arc<ThrottleController>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            throttle,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 下载一个分片。可重试的错误在本层消化，重试耗尽后统一包装为 `ChunkFailed`。
    pub async fn download(&self, req: ChunkRequest<'_>) -> Result<ChunkResult> {
        let index = req.range.index;
        let result = self
            .policy
            .run("chunk", req.cancel, |attempt| async move {
                if attempt > 0 {
                    tracing::debug!(chunk_index = index, attempt, "重新请求分片");
                }
                self.attempt(&req).await
            })
            .await;

        match result {
            Ok(chunk) => Ok(chunk),
            Err(e) if self.policy.is_retryable(self.policy.classify(&e)) => {
                Err(SyncError::ChunkFailed {
                    chunk_index: index,
                    retries: self.policy.max_retries,
                    message: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 单次尝试：先领令牌，再在超时内完成请求与读取；取消会同时中断两者。
    async fn attempt(&self, req: &ChunkRequest<'_>) -> Result<ChunkResult> {
        self.throttle.acquire(req.range.len(), req.cancel).await?;

        let fetch = range_request::fetch_range(&self.client, req);
        tokio::select! {
            r = tokio::time::timeout(self.timeout, fetch) => match r {
                Ok(r) => r,
                Err(_) => Err(SyncError::Timeout { chunk_index: req.range.index }),
            },
            _ = req.cancel.cancelled() => Err(SyncError::Cancelled),
        }
    }

    /// 查询远程文件大小：HEAD → 元数据 → `Range: bytes=0-0`。
    ///
    /// 每次查询请求与分片一样受单请求超时约束，并可被取消打断。
    pub async fn resolve_size(
        &self,
        url: &Url,
        fallback: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let from_head = self
            .policy
            .run("size_head", cancel, |_| {
                self.bounded(url, cancel, size_lookup::head_length(&self.client, url))
            })
            .await?;
        if let Some(size) = from_head {
            return Ok(size);
        }
        if let Some(size) = fallback.filter(|s| *s > 0) {
            tracing::debug!(url = %url, size, "HEAD 未给出长度，使用元数据中的大小");
            return Ok(size);
        }
        self.policy
            .run("size_range", cancel, |_| {
                self.bounded(url, cancel, size_lookup::content_range_length(&self.client, url))
            })
            .await
    }

    async fn bounded<T>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            r = tokio::time::timeout(self.timeout, request) => match r {
                Ok(r) => r,
                Err(_) => Err(SyncError::SizeCheckTimeout { url: url.to_string() }),
            },
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
        }
    }
}
