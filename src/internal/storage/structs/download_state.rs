use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::download_status::DownloadStatus;

/// 单首歌曲的持久化下载进度。只能通过 `DownloadStateStore` 修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    pub song_id: String,
    pub playlist_id: String,
    pub total_chunks: usize,
    /// 规划分片时的文件大小，重启后据此重算同样的分片方案
    pub file_size: u64,
    pub downloaded_chunk_indices: BTreeSet<usize>,
    pub progress_pct: f64,
    pub status: DownloadStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl DownloadState {
    pub fn new(playlist_id: &str, song_id: &str, total_chunks: usize, file_size: u64) -> Self {
        Self {
            song_id: song_id.to_string(),
            playlist_id: playlist_id.to_string(),
            total_chunks,
            file_size,
            downloaded_chunk_indices: BTreeSet::new(),
            progress_pct: 0.0,
            status: DownloadStatus::Pending,
            last_error: None,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// 尚未下载的分片序号：`全部序号 - 已下载序号`。
    pub fn remaining_chunks(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.downloaded_chunk_indices.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Completed
    }

    pub(crate) fn recompute_progress(&mut self) {
        self.progress_pct = if self.total_chunks == 0 {
            0.0
        } else {
            self.downloaded_chunk_indices.len() as f64 * 100.0 / self.total_chunks as f64
        };
    }
}
