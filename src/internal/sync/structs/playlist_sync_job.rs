use std::collections::HashSet;

use url::Url;

use crate::internal::errors::sync_error::Result;

use super::playlist_ref::PlaylistRef;
use super::song_ref::SongRef;

/// 一次歌单同步的工作单，只在一次 `BatchSyncManager::sync` 内有效，不落盘。
#[derive(Debug, Clone)]
pub struct PlaylistSyncJob {
    pub playlist_id: String,
    pub base_url: Url,
    pub songs: Vec<SongRef>,
    pub current_batch_index: usize,
}

impl PlaylistSyncJob {
    /// 由元数据构造；重复的歌曲 id 只保留第一次出现。
    pub fn from_ref(playlist: &PlaylistRef) -> Result<Self> {
        let base_url = Url::parse(&playlist.base_url)?;
        let mut seen = HashSet::new();
        let songs = playlist
            .songs
            .iter()
            .filter(|s| seen.insert(s.id.clone()))
            .cloned()
            .collect();
        Ok(Self {
            playlist_id: playlist.id.clone(),
            base_url,
            songs,
            current_batch_index: 0,
        })
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        self.songs.len().div_ceil(batch_size.max(1))
    }
}
