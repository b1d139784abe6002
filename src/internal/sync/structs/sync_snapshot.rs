use std::collections::BTreeMap;

use super::outcomes::PlaylistStatus;

/// 单个歌单的进度快照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub total_songs: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub status: PlaylistStatus,
}

impl PlaylistSnapshot {
    pub fn new(total_songs: usize) -> Self {
        Self {
            total_songs,
            completed: 0,
            failed: 0,
            in_progress: 0,
            status: PlaylistStatus::InProgress,
        }
    }
}

/// 引擎级快照，按歌单 id 索引。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub playlists: BTreeMap<String, PlaylistSnapshot>,
}

impl SyncSnapshot {
    pub fn playlist(&self, playlist_id: &str) -> Option<&PlaylistSnapshot> {
        self.playlists.get(playlist_id)
    }
}
