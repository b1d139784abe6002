//! 同步引擎配置：所有字段均有默认值，可从 JSON 文件加载后再由构建器覆盖。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::internal::errors::sync_error::{Result, SyncError};

/// 默认同时下载的歌曲数
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// 默认单首歌曲的分片并发数
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 3;

/// 默认每批歌曲数
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// 默认单分片超时（毫秒）
pub const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 30_000;

/// 默认分片重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认退避基数（毫秒）
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// 默认退避上限（毫秒）
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// 默认随机抖动上限（毫秒）
pub const DEFAULT_RETRY_JITTER_MS: u64 = 1_000;

/// 默认整文件重试次数
pub const DEFAULT_MAX_FILE_RETRIES: u32 = 1;

/// 默认孤儿临时文件存活时间：2 小时
pub const DEFAULT_ORPHAN_TTL_SECS: u64 = 7_200;

/// 默认孤儿清理周期：30 分钟
pub const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 1_800;

const APP_DIR: &str = "playlist_sync";
const STATE_FILE_NAME: &str = "download-states.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 最终歌曲文件的根目录，按 `<media_root>/<playlist_id>/<song_id>.<ext>` 存放
    pub media_root: PathBuf,
    /// 下载状态文件路径
    pub state_file: PathBuf,
    pub max_concurrent_downloads: usize,
    pub max_concurrent_chunks: usize,
    /// 全局限速（字节/秒），`None` 表示不限速
    pub max_bytes_per_second: Option<u64>,
    pub batch_size: usize,
    pub chunk_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub max_file_retries: u32,
    pub orphan_ttl_secs: u64,
    pub orphan_sweep_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            state_file: default_state_file(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            max_bytes_per_second: None,
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_timeout_ms: DEFAULT_CHUNK_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_jitter_ms: DEFAULT_RETRY_JITTER_MS,
            max_file_retries: DEFAULT_MAX_FILE_RETRIES,
            orphan_ttl_secs: DEFAULT_ORPHAN_TTL_SECS,
            orphan_sweep_interval_secs: DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
        }
    }
}

impl SyncConfig {
    /// 从 JSON 文件加载配置，缺省字段取默认值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| SyncError::io(path, e))?;
        let config: SyncConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 文件不存在时返回默认配置，其它错误照常返回。
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// 检查配置取值是否合法。
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(SyncError::Config("max_concurrent_downloads 不能为 0".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(SyncError::Config("max_concurrent_chunks 不能为 0".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size 不能为 0".into()));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(SyncError::Config("chunk_timeout_ms 不能为 0".into()));
        }
        if self.max_bytes_per_second == Some(0) {
            return Err(SyncError::Config("max_bytes_per_second 不能为 0".into()));
        }
        if self.orphan_sweep_interval_secs == 0 {
            return Err(SyncError::Config("orphan_sweep_interval_secs 不能为 0".into()));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(SyncError::Config(
                "retry_max_delay_ms 不能小于 retry_base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs)
    }
}

fn base_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

fn default_media_root() -> PathBuf {
    match dirs::audio_dir() {
        Some(dir) => dir.join(APP_DIR),
        None => base_data_dir().join("media"),
    }
}

fn default_state_file() -> PathBuf {
    base_data_dir().join(STATE_FILE_NAME)
}
