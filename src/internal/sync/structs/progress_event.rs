use serde::{Deserialize, Serialize};

use crate::internal::storage::structs::DownloadStatus;

use super::outcomes::PlaylistStatus;

/// 对外进度事件，由外部消息总线（如 WebSocket）转发给设备 UI 与管理后台。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 一个分片已写入暂存文件
    #[serde(rename_all = "camelCase")]
    ChunkCompleted {
        playlist_id: String,
        song_id: String,
        chunk_index: usize,
        progress_pct: f64,
    },
    /// 歌曲状态迁移
    #[serde(rename_all = "camelCase")]
    SongStatus {
        playlist_id: String,
        song_id: String,
        status: DownloadStatus,
        progress_pct: f64,
        error: Option<String>,
    },
    /// 歌单整体状态
    #[serde(rename_all = "camelCase")]
    PlaylistStatus {
        playlist_id: String,
        status: PlaylistStatus,
        completed: usize,
        failed: usize,
        total: usize,
    },
    /// 磁盘满、权限不足等需要人工介入的错误
    #[serde(rename_all = "camelCase")]
    ResourceAlert {
        playlist_id: String,
        song_id: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn playlist_id(&self) -> &str {
        match self {
            ProgressEvent::ChunkCompleted { playlist_id, .. }
            | ProgressEvent::SongStatus { playlist_id, .. }
            | ProgressEvent::PlaylistStatus { playlist_id, .. }
            | ProgressEvent::ResourceAlert { playlist_id, .. } => playlist_id,
        }
    }
}
