use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::internal::config::sync_config::SyncConfig;
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::sync::sync_context::{ProgressReceiver, SyncContext};
use crate::internal::sync::traits::StagingSinkFactory;

use super::SyncEngine;

/// 引擎构建器：在配置文件的基础上逐项覆盖。
#[derive(Debug)]
pub struct SyncEngineBuilder {
    config: SyncConfig,
    client: Option<reqwest::Client>,
    start_sweeper: bool,
    adopt_orphans: bool,
    sinks: Option<Arc<dyn StagingSinkFactory>>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            client: None,
            start_sweeper: true,
            adopt_orphans: true,
            sinks: None,
        }
    }

    pub fn media_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.media_root = path.into();
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_file = path.into();
        self
    }

    pub fn max_concurrent_downloads(mut self, n: usize) -> Self {
        self.config.max_concurrent_downloads = n;
        self
    }

    pub fn max_concurrent_chunks(mut self, n: usize) -> Self {
        self.config.max_concurrent_chunks = n;
        self
    }

    pub fn max_bytes_per_second(mut self, rate: Option<u64>) -> Self {
        self.config.max_bytes_per_second = rate;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.config.chunk_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 分片重试次数与退避参数（毫秒）。
    pub fn retry(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> Self {
        self.config.max_retries = max_retries;
        self.config.retry_base_delay_ms = base_delay_ms;
        self.config.retry_max_delay_ms = max_delay_ms;
        self.config.retry_jitter_ms = jitter_ms;
        self
    }

    pub fn max_file_retries(mut self, n: u32) -> Self {
        self.config.max_file_retries = n;
        self
    }

    pub fn orphan_ttl(mut self, ttl: Duration) -> Self {
        self.config.orphan_ttl_secs = ttl.as_secs();
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// 是否启动后台孤儿清扫，默认启动。
    pub fn start_sweeper(mut self, enabled: bool) -> Self {
        self.start_sweeper = enabled;
        self
    }

    /// 是否在启动时登记 `media_root` 下遗留的暂存文件，默认登记。
    pub fn adopt_orphans(mut self, enabled: bool) -> Self {
        self.adopt_orphans = enabled;
        self
    }

    /// 替换暂存写出端的来源，默认写本地暂存文件。
    pub fn staging_sinks(mut self, sinks: Arc<dyn StagingSinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// 组装引擎：同步加载状态文件、登记遗留暂存文件、启动后台清扫。
    pub async fn build(self) -> Result<(SyncEngine, ProgressReceiver)> {
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| SyncError::Config(format!("HTTP 客户端创建失败: {e}")))?,
        };
        let (mut ctx, receiver) = SyncContext::new(self.config, client)?;
        if let Some(sinks) = self.sinks {
            ctx.sinks = sinks;
        }
        let ctx = Arc::new(ctx);

        if self.adopt_orphans {
            ctx.temp_files.adopt_orphans(&ctx.config.media_root).await?;
        }
        let sweeper = if self.start_sweeper {
            Some(ctx.temp_files.spawn_sweeper(
                ctx.config.orphan_sweep_interval(),
                ctx.controller.cancel_token().child_token(),
            ))
        } else {
            None
        };

        tracing::info!(
            media_root = %ctx.config.media_root.display(),
            state_file = %ctx.config.state_file.display(),
            max_concurrent_downloads = ctx.config.max_concurrent_downloads,
            max_bytes_per_second = ?ctx.config.max_bytes_per_second,
            "同步引擎已启动"
        );

        let engine = SyncEngine {
            ctx,
            playlist_tokens: StdMutex::new(HashMap::new()),
            next_registration: AtomicU64::new(0),
            sweeper: StdMutex::new(sweeper),
        };
        Ok((engine, receiver))
    }
}
