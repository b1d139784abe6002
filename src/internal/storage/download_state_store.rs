//! 下载状态持久化：`playlistId → songId → DownloadState`，单个 JSON 文件。
//!
//! - 启动时同步加载，主文件损坏时回退到 `.bak`。
//! - 每次变更后落盘：旧主文件复制为 `.bak`，新内容写入 `.tmp` 后 rename 覆盖主文件。
//! - 所有变更经由同一把异步锁串行化，落盘顺序与变更顺序一致。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;

use crate::internal::chunking::chunk_planner::ChunkPlanner;
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::storage::structs::{DownloadState, DownloadStatus};

pub const STATE_FILE_VERSION: u32 = 1;

type PlaylistStates = BTreeMap<String, DownloadState>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    playlists: BTreeMap<String, PlaylistStates>,
}

/// 从哪个文件加载到的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Primary,
    Backup,
    Empty,
}

#[derive(Debug)]
pub struct DownloadStateStore {
    path: PathBuf,
    states: StdMutex<StateFile>,
    persist_lock: TokioMutex<()>,
    loaded_from: LoadedFrom,
}

impl DownloadStateStore {
    /// 同步加载状态文件；文件不存在时从空状态开始。
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (file, loaded_from) = load_with_backup(&path)?;
        let songs: usize = file.playlists.values().map(|p| p.len()).sum();
        tracing::info!(
            path = %path.display(),
            playlists = file.playlists.len(),
            songs,
            source = ?loaded_from,
            "下载状态已加载"
        );
        Ok(Self {
            path,
            states: StdMutex::new(file),
            persist_lock: TokioMutex::new(()),
            loaded_from,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn loaded_from(&self) -> LoadedFrom {
        self.loaded_from
    }

    /// 新建（或覆盖为）`Pending` 状态，分片数由 `ChunkPlanner` 按文件大小算出。
    pub async fn initialize(&self, playlist_id: &str, song_id: &str, file_size: u64) -> Result<DownloadState> {
        let total = ChunkPlanner::chunk_count(file_size);
        self.mutate(|file| {
            let state = DownloadState::new(playlist_id, song_id, total, file_size);
            file.playlists
                .entry(playlist_id.to_string())
                .or_default()
                .insert(song_id.to_string(), state.clone());
            Ok((state, true))
        })
        .await
    }

    /// 还没规划分片就失败的歌曲，一次写入建档为 `Error`。
    ///
    /// 有大小时按其规划分片数；没有大小时记 1 个占位分片、`file_size = 0`，
    /// 分片集合始终不满，重新初始化后按真实大小重建。
    pub async fn record_unplanned_error(
        &self,
        playlist_id: &str,
        song_id: &str,
        size_hint: Option<u64>,
        message: &str,
    ) -> Result<DownloadState> {
        let file_size = size_hint.unwrap_or(0);
        let total = ChunkPlanner::chunk_count(file_size).max(1);
        self.mutate(|file| {
            let mut state = DownloadState::new(playlist_id, song_id, total, file_size);
            state.status = DownloadStatus::Error;
            state.last_error = Some(message.to_string());
            file.playlists
                .entry(playlist_id.to_string())
                .or_default()
                .insert(song_id.to_string(), state.clone());
            Ok((state, true))
        })
        .await
    }

    /// 已有记录且文件大小一致时原样返回，否则重新初始化。
    pub async fn resume_or_initialize(
        &self,
        playlist_id: &str,
        song_id: &str,
        file_size: u64,
    ) -> Result<DownloadState> {
        if let Some(existing) = self.get(playlist_id, song_id) {
            if existing.file_size == file_size {
                return Ok(existing);
            }
            tracing::warn!(
                playlist_id,
                song_id,
                old_size = existing.file_size,
                new_size = file_size,
                "远程文件大小变化，重新初始化下载状态"
            );
        }
        self.initialize(playlist_id, song_id, file_size).await
    }

    pub fn get(&self, playlist_id: &str, song_id: &str) -> Option<DownloadState> {
        self.lock_states()
            .playlists
            .get(playlist_id)
            .and_then(|p| p.get(song_id))
            .cloned()
    }

    pub async fn mark_downloading(&self, playlist_id: &str, song_id: &str) -> Result<DownloadState> {
        self.set_status(playlist_id, song_id, DownloadStatus::Downloading).await
    }

    pub async fn mark_paused(&self, playlist_id: &str, song_id: &str) -> Result<DownloadState> {
        self.set_status(playlist_id, song_id, DownloadStatus::Paused).await
    }

    /// 记录一个已落盘的分片，幂等。
    ///
    /// 会让集合填满的最后一个分片不在这里记录，而是在整文件校验通过后随 `mark_completed`
    /// 一并提交，保证“集合已满 ⟺ Completed”在任何落盘时刻都成立。
    pub async fn mark_chunk_downloaded(
        &self,
        playlist_id: &str,
        song_id: &str,
        index: usize,
    ) -> Result<DownloadState> {
        self.mutate(|file| {
            let state = find_mut(file, playlist_id, song_id)?;
            if index >= state.total_chunks {
                return Err(SyncError::InvalidChunkIndex {
                    index,
                    total: state.total_chunks,
                });
            }
            if state.status.is_terminal() || state.downloaded_chunk_indices.contains(&index) {
                return Ok((state.clone(), false));
            }
            if state.downloaded_chunk_indices.len() + 1 == state.total_chunks {
                tracing::debug!(playlist_id, song_id, chunk_index = index, "最后一个分片待整文件校验后提交");
                return Ok((state.clone(), false));
            }
            state.downloaded_chunk_indices.insert(index);
            state.recompute_progress();
            state.updated_at = Utc::now();
            Ok((state.clone(), true))
        })
        .await
    }

    pub async fn mark_completed(&self, playlist_id: &str, song_id: &str) -> Result<DownloadState> {
        self.mutate(|file| {
            let state = find_mut(file, playlist_id, song_id)?;
            state.downloaded_chunk_indices = (0..state.total_chunks).collect();
            state.status = DownloadStatus::Completed;
            state.last_error = None;
            state.recompute_progress();
            state.updated_at = Utc::now();
            Ok((state.clone(), true))
        })
        .await
    }

    pub async fn mark_error(&self, playlist_id: &str, song_id: &str, message: &str) -> Result<DownloadState> {
        self.mutate(|file| {
            let state = find_mut(file, playlist_id, song_id)?;
            state.status = DownloadStatus::Error;
            state.last_error = Some(message.to_string());
            state.updated_at = Utc::now();
            Ok((state.clone(), true))
        })
        .await
    }

    /// 整文件校验失败：清空已下载分片，回到 `Pending`，`retry_count + 1`。
    pub async fn reset_for_retry(&self, playlist_id: &str, song_id: &str, reason: &str) -> Result<DownloadState> {
        self.mutate(|file| {
            let state = find_mut(file, playlist_id, song_id)?;
            state.downloaded_chunk_indices.clear();
            state.status = DownloadStatus::Pending;
            state.last_error = Some(reason.to_string());
            state.retry_count += 1;
            state.recompute_progress();
            state.updated_at = Utc::now();
            Ok((state.clone(), true))
        })
        .await
    }

    /// 显式重新初始化一首歌（通常用于 `Error` 之后）。记录不存在时返回 `None`。
    pub async fn reinitialize(&self, playlist_id: &str, song_id: &str) -> Result<Option<DownloadState>> {
        self.mutate(|file| {
            let Some(state) = file.playlists.get_mut(playlist_id).and_then(|p| p.get_mut(song_id)) else {
                return Ok((None, false));
            };
            state.downloaded_chunk_indices.clear();
            state.status = DownloadStatus::Pending;
            state.last_error = None;
            state.retry_count = 0;
            state.recompute_progress();
            state.updated_at = Utc::now();
            Ok((Some(state.clone()), true))
        })
        .await
    }

    /// 歌单中所有非终态的记录，供重启后续传。
    pub fn get_incomplete(&self, playlist_id: &str) -> Vec<DownloadState> {
        self.lock_states()
            .playlists
            .get(playlist_id)
            .map(|p| p.values().filter(|s| !s.status.is_terminal()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn playlist_states(&self, playlist_id: &str) -> Vec<DownloadState> {
        self.lock_states()
            .playlists
            .get(playlist_id)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 含有非终态记录的歌单 id。
    pub fn playlists_with_incomplete(&self) -> Vec<String> {
        self.lock_states()
            .playlists
            .iter()
            .filter(|(_, songs)| songs.values().any(|s| !s.status.is_terminal()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 删除整个歌单的记录，返回删除的歌曲数。
    pub async fn remove_playlist(&self, playlist_id: &str) -> Result<usize> {
        self.mutate(|file| {
            let removed = file.playlists.remove(playlist_id).map(|p| p.len()).unwrap_or(0);
            Ok((removed, removed > 0))
        })
        .await
    }

    async fn set_status(&self, playlist_id: &str, song_id: &str, status: DownloadStatus) -> Result<DownloadState> {
        self.mutate(|file| {
            let state = find_mut(file, playlist_id, song_id)?;
            if state.status.is_terminal() {
                return Err(SyncError::InvalidState(format!(
                    "{playlist_id}/{song_id} 已处于终态 {:?}，不能迁移到 {status:?}",
                    state.status
                )));
            }
            if state.status == status {
                return Ok((state.clone(), false));
            }
            state.status = status;
            state.updated_at = Utc::now();
            Ok((state.clone(), true))
        })
        .await
    }

    /// 在持久化锁内修改并落盘。`f` 返回 `(结果, 是否有变化)`，无变化时不写盘。
    ///
    /// 变更作用在副本上，落盘成功后才替换内存状态；写盘失败时内存与磁盘保持一致。
    async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StateFile) -> Result<(R, bool)>,
    {
        let _persist = self.persist_lock.lock().await;
        let mut next = (*self.lock_states()).clone();
        let (out, changed) = f(&mut next)?;
        if !changed {
            return Ok(out);
        }
        next.version = STATE_FILE_VERSION;
        let bytes = serde_json::to_vec_pretty(&next)?;
        write_atomically(&self.path, &bytes).await?;
        *self.lock_states() = next;
        Ok(out)
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, StateFile> {
        match self.states.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("下载状态锁中毒，继续使用恢复后的数据");
                poisoned.into_inner()
            }
        }
    }
}

fn find_mut<'a>(file: &'a mut StateFile, playlist_id: &str, song_id: &str) -> Result<&'a mut DownloadState> {
    file.playlists
        .get_mut(playlist_id)
        .and_then(|p| p.get_mut(song_id))
        .ok_or_else(|| SyncError::InvalidState(format!("{playlist_id}/{song_id} 没有下载记录")))
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "bak")
}

fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, "tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn load_with_backup(path: &Path) -> Result<(StateFile, LoadedFrom)> {
    match read_state_file(path) {
        Ok(Some(file)) => return Ok((file, LoadedFrom::Primary)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "状态文件损坏，尝试备份文件");
        }
    }
    let bak = backup_path(path);
    match read_state_file(&bak)? {
        Some(file) => Ok((file, LoadedFrom::Backup)),
        None => Ok((
            StateFile {
                version: STATE_FILE_VERSION,
                playlists: BTreeMap::new(),
            },
            LoadedFrom::Empty,
        )),
    }
}

fn read_state_file(path: &Path) -> Result<Option<StateFile>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io(path, e)),
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
    }
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let bak = backup_path(path);
        tokio::fs::copy(path, &bak).await.map_err(|e| SyncError::io(&bak, e))?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await.map_err(|e| SyncError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| SyncError::io(path, e))?;
    Ok(())
}
