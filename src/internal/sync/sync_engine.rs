//! 同步引擎：唯一的顶层所有者，持有全部协作者并对外提供歌单同步入口。

mod builder;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::internal::config::sync_config::SyncConfig;
use crate::internal::errors::sync_error::Result;
use crate::internal::states::unlock_reactive::UnlockReactiveProperty;
use crate::internal::storage::structs::{DownloadState, DownloadStatus};
use crate::internal::sync::batch_sync_manager::BatchSyncManager;
use crate::internal::sync::structs::{PlaylistOutcome, PlaylistRef, PlaylistSyncJob, SyncSnapshot};
use crate::internal::sync::sync_context::SyncContext;
use crate::internal::sync::sync_controller::SyncController;
use crate::internal::sync::traits::PlaylistSource;

pub use builder::SyncEngineBuilder;

/// 正在同步的歌单。`finished` 的发送端由同步过程持有，结束（或被丢弃）时关闭。
#[derive(Debug, Clone)]
struct Registration {
    id: u64,
    cancel: CancellationToken,
    finished: watch::Receiver<()>,
}

pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    playlist_tokens: StdMutex<HashMap<String, Registration>>,
    next_registration: AtomicU64,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn controller(&self) -> &SyncController {
        &self.ctx.controller
    }

    /// 可监听的进度快照。
    pub fn progress(&self) -> UnlockReactiveProperty<SyncSnapshot> {
        self.ctx.snapshot()
    }

    pub fn states(&self, playlist_id: &str) -> Vec<DownloadState> {
        self.ctx.store.playlist_states(playlist_id)
    }

    /// 同步一个歌单，返回逐首结果。
    pub async fn sync_playlist(&self, playlist: &PlaylistRef) -> Result<PlaylistOutcome> {
        let mut job = PlaylistSyncJob::from_ref(playlist)?;
        let (registration, token, _running) = self.register_playlist(&job.playlist_id);
        let manager = BatchSyncManager::new(Arc::clone(&self.ctx));
        let outcome = manager.sync(&mut job, &token).await;
        self.unregister_playlist(&job.playlist_id, registration);
        Ok(outcome)
    }

    /// 从元数据来源取歌单后同步。
    pub async fn sync_from_source(&self, source: &dyn PlaylistSource, playlist_id: &str) -> Result<PlaylistOutcome> {
        let playlist = source.fetch_playlist(playlist_id).await?;
        self.sync_playlist(&playlist).await
    }

    /// 启动后续传：找出含非终态记录的歌单，重新取元数据并同步。
    ///
    /// 单个歌单取元数据失败只记录日志，不影响其它歌单。
    pub async fn resume_incomplete(&self, source: &dyn PlaylistSource) -> Vec<PlaylistOutcome> {
        let pending = self.ctx.store.playlists_with_incomplete();
        tracing::info!(playlists = pending.len(), "续传未完成的歌单");
        let mut outcomes = Vec::with_capacity(pending.len());
        for playlist_id in pending {
            if self.ctx.controller.is_cancelled() {
                break;
            }
            match self.sync_from_source(source, &playlist_id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(playlist_id, error = %e, "续传歌单失败"),
            }
        }
        outcomes
    }

    /// 停止一个歌单的同步；暂存文件保留，留给续传或孤儿清扫。
    pub fn stop_playlist(&self, playlist_id: &str) -> bool {
        self.cancel_running(playlist_id).is_some()
    }

    /// 停止并删除歌单的全部下载记录，返回删除的记录数。
    ///
    /// 先等正在进行的同步完全退出，之后不会再有写入把记录带回来。
    pub async fn remove_playlist(&self, playlist_id: &str) -> Result<usize> {
        if let Some(mut finished) = self.cancel_running(playlist_id) {
            // 从不发送，只在发送端释放时返回
            let _ = finished.changed().await;
        }
        let removed = self.ctx.store.remove_playlist(playlist_id).await?;
        self.ctx.remove_playlist_snapshot(playlist_id);
        tracing::info!(playlist_id, removed, "已删除歌单下载记录");
        Ok(removed)
    }

    /// 显式重新初始化一首歌，`Error` 状态只能由此恢复。
    pub async fn reset_song(&self, playlist_id: &str, song_id: &str) -> Result<Option<DownloadState>> {
        let state = self.ctx.store.reinitialize(playlist_id, song_id).await?;
        if let Some(state) = &state {
            self.ctx.emit_song_status(state);
        }
        Ok(state)
    }

    /// 把歌单中所有 `Error` 歌曲重新初始化，返回处理的数量。
    pub async fn retry_failed(&self, playlist_id: &str) -> Result<usize> {
        let failed: Vec<String> = self
            .ctx
            .store
            .playlist_states(playlist_id)
            .into_iter()
            .filter(|s| s.status == DownloadStatus::Error)
            .map(|s| s.song_id)
            .collect();
        for song_id in &failed {
            self.reset_song(playlist_id, song_id).await?;
        }
        Ok(failed.len())
    }

    /// 取消全部同步、停止后台清扫，并关闭进度快照的监听者。
    pub async fn shutdown(&self) {
        self.ctx.controller.cancel();
        let sweeper = match self.sweeper.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        self.ctx.snapshot().destroy();
        tracing::info!("同步引擎已关闭");
    }

    fn cancel_running(&self, playlist_id: &str) -> Option<watch::Receiver<()>> {
        let running = self.lock_tokens().get(playlist_id).cloned()?;
        tracing::info!(playlist_id, "停止歌单同步");
        running.cancel.cancel();
        Some(running.finished)
    }

    fn register_playlist(&self, playlist_id: &str) -> (u64, CancellationToken, watch::Sender<()>) {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let cancel = self.ctx.controller.cancel_token().child_token();
        let (running, finished) = watch::channel(());
        let previous = self.lock_tokens().insert(
            playlist_id.to_string(),
            Registration {
                id,
                cancel: cancel.clone(),
                finished,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(playlist_id, "同一歌单重复同步，停止上一次");
            previous.cancel.cancel();
        }
        (id, cancel, running)
    }

    /// 只移除自己登记的令牌，后来的同步可能已经替换了它。
    fn unregister_playlist(&self, playlist_id: &str, registration: u64) {
        let mut tokens = self.lock_tokens();
        if tokens.get(playlist_id).map(|r| r.id) == Some(registration) {
            tokens.remove(playlist_id);
        }
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        match self.playlist_tokens.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.ctx.controller.cancel();
    }
}
