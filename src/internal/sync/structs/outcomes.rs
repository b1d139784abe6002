use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::internal::errors::error_class::ErrorClass;

/// 歌单同步的聚合状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistStatus {
    InProgress,
    /// 全部歌曲完成
    Synced,
    /// 部分歌曲失败
    PartiallyFailed,
    /// 没有任何歌曲完成
    Failed,
    Cancelled,
    /// 因磁盘满、权限不足等中止
    ResourceFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SongResult {
    Completed {
        path: PathBuf,
        /// 之前已经下载完成，本次未发起传输
        already_present: bool,
    },
    Failed {
        error: String,
        class: ErrorClass,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongOutcome {
    pub song_id: String,
    pub result: SongResult,
}

impl SongOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.result, SongResult::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.result, SongResult::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, SongResult::Cancelled)
    }

    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self.result,
            SongResult::Failed {
                class: ErrorClass::Resource,
                ..
            }
        )
    }
}

/// 歌单同步结果：逐首给出结果，部分成功同样可见。
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistOutcome {
    pub playlist_id: String,
    pub status: PlaylistStatus,
    pub songs: Vec<SongOutcome>,
}

impl PlaylistOutcome {
    pub fn completed(&self) -> usize {
        self.songs.iter().filter(|s| s.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.songs.iter().filter(|s| s.is_failed()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.songs.iter().filter(|s| s.is_cancelled()).count()
    }

    pub fn song(&self, song_id: &str) -> Option<&SongOutcome> {
        self.songs.iter().find(|s| s.song_id == song_id)
    }
}
