//! 单曲协调器：查询大小 → 分片规划 → 续传状态 → 分片流水线 → 整文件校验 → 转正。
//!
//! 状态机：`Pending → Downloading → {Completed | Error}`，暂停时 `Downloading → Paused → Downloading`。
//! `Error` 是终态，必须显式重新初始化，协调器不会自动重启失败的歌曲。

mod chunk_pipeline;
mod staging_sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::internal::chunking::chunk_planner::ChunkPlanner;
use crate::internal::chunking::traits::ChunkSink;
use crate::internal::errors::error_class::ErrorClass;
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::integrity::integrity_verifier::IntegrityVerifier;
use crate::internal::storage::structs::{DownloadState, DownloadStatus};
use crate::internal::sync::structs::{SongOutcome, SongRef, SongResult};
use crate::internal::sync::sync_context::SyncContext;

use chunk_pipeline::{PipelineParams, run_pipeline};

pub use staging_sink::FileSinkFactory;

pub struct SongDownloadCoordinator {
    ctx: Arc<SyncContext>,
    playlist_id: String,
    base_url: Url,
    song: SongRef,
}

/// 一次完整尝试的结果。
struct Finished {
    path: PathBuf,
    already_present: bool,
}

impl SongDownloadCoordinator {
    pub fn new(ctx: Arc<SyncContext>, playlist_id: &str, base_url: &Url, song: SongRef) -> Self {
        Self {
            ctx,
            playlist_id: playlist_id.to_string(),
            base_url: base_url.clone(),
            song,
        }
    }

    pub fn song_id(&self) -> &str {
        &self.song.id
    }

    pub fn final_path(&self) -> PathBuf {
        self.song.final_path(&self.ctx.config.media_root, &self.playlist_id)
    }

    /// 运行到终态或取消。任何错误都会落到返回值与状态存储里，不会被吞掉。
    pub async fn run(&self, cancel: &CancellationToken) -> SongOutcome {
        let song_id = self.song.id.clone();

        if let Some(state) = self.ctx.store.get(&self.playlist_id, &song_id) {
            if state.status == DownloadStatus::Error {
                tracing::debug!(playlist_id = %self.playlist_id, song_id, "歌曲处于 Error 状态，需要显式重新初始化");
                return SongOutcome {
                    song_id,
                    result: SongResult::Failed {
                        error: state.last_error.unwrap_or_else(|| "上次下载失败".to_string()),
                        class: ErrorClass::Fatal,
                    },
                };
            }
        }

        let result = self
            .ctx
            .file_policy
            .run("song", cancel, |attempt| self.attempt(attempt, cancel))
            .await;

        let result = match result {
            Ok(done) => SongResult::Completed {
                path: done.path,
                already_present: done.already_present,
            },
            Err(e) if e.class().is_cancelled() => {
                self.persist_paused().await;
                SongResult::Cancelled
            }
            Err(e) => self.persist_error(e).await,
        };
        SongOutcome { song_id, result }
    }

    async fn attempt(&self, attempt: u32, cancel: &CancellationToken) -> Result<Finished> {
        let ctx = &self.ctx;
        let playlist_id = self.playlist_id.as_str();
        let song_id = self.song.id.as_str();
        let url = self.song.download_url(&self.base_url)?;
        let final_path = self.final_path();

        let file_size = ctx.transfer.resolve_size(&url, self.song.size, cancel).await?;
        let plan = ChunkPlanner::plan(file_size as i64)?;
        // 大小查询完成与取消可能同时发生；取消后不再建档
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let mut state = ctx
            .store
            .resume_or_initialize(playlist_id, song_id, file_size)
            .await?;

        if state.status == DownloadStatus::Completed {
            if file_len(&final_path).await == Some(file_size) {
                tracing::debug!(playlist_id, song_id, "歌曲已存在，跳过");
                return Ok(Finished {
                    path: final_path,
                    already_present: true,
                });
            }
            tracing::warn!(playlist_id, song_id, "记录为已完成但文件缺失，重新下载");
            state = ctx.store.initialize(playlist_id, song_id, file_size).await?;
        }

        let handle = ctx.temp_files.stage(song_id, &final_path).await?;
        let staging_path = handle.staging_path;
        if !state.downloaded_chunk_indices.is_empty()
            && file_len(&staging_path).await != Some(file_size)
        {
            tracing::warn!(playlist_id, song_id, "暂存文件与记录不一致，从头下载");
            state = ctx.store.initialize(playlist_id, song_id, file_size).await?;
        }

        let sink = ctx.sinks.open(&staging_path, file_size).await?;
        let downloading = ctx.store.mark_downloading(playlist_id, song_id).await?;
        ctx.emit_song_status(&downloading);
        tracing::info!(
            playlist_id,
            song_id,
            attempt,
            file_size,
            total_chunks = plan.len(),
            remaining = state.remaining_chunks().len(),
            "开始下载歌曲"
        );

        let mut sink = run_pipeline(PipelineParams {
            ctx,
            playlist_id,
            song: &self.song,
            url: &url,
            plan: &plan,
            file_size,
            already_written: state.downloaded_chunk_indices.clone(),
            sink,
            cancel,
        })
        .await?;
        sink.finish().await?;

        let verified = IntegrityVerifier::verify_file(
            song_id,
            &staging_path,
            file_size,
            self.song.checksum.as_deref(),
        )
        .await;
        if let Err(e) = verified {
            if e.class() == ErrorClass::Integrity {
                self.requeue_after_corruption(&staging_path, &e).await?;
            }
            return Err(e);
        }

        ctx.temp_files.promote(&staging_path, &final_path).await?;
        let completed = ctx.store.mark_completed(playlist_id, song_id).await?;
        ctx.emit_song_status(&completed);
        tracing::info!(playlist_id, song_id, path = %final_path.display(), "歌曲下载完成");
        Ok(Finished {
            path: final_path,
            already_present: false,
        })
    }

    /// 整文件校验失败无法定位到具体分片：丢弃暂存文件，清空分片记录，回到 `Pending`。
    async fn requeue_after_corruption(&self, staging_path: &Path, error: &SyncError) -> Result<()> {
        tracing::warn!(
            playlist_id = %self.playlist_id,
            song_id = %self.song.id,
            error = %error,
            "整文件校验失败，清空后重新排队"
        );
        self.ctx.temp_files.discard(staging_path).await?;
        let pending = self
            .ctx
            .store
            .reset_for_retry(&self.playlist_id, &self.song.id, &error.to_string())
            .await?;
        self.ctx.emit_song_status(&pending);
        Ok(())
    }

    /// 取消不是错误：记为 `Paused`，暂存文件留给续传或孤儿清扫。
    async fn persist_paused(&self) {
        let Some(state) = self.ctx.store.get(&self.playlist_id, &self.song.id) else {
            return;
        };
        if state.status.is_terminal() || state.status == DownloadStatus::Paused {
            return;
        }
        match self.ctx.store.mark_paused(&self.playlist_id, &self.song.id).await {
            Ok(paused) => self.ctx.emit_song_status(&paused),
            Err(e) => tracing::warn!(song_id = %self.song.id, error = %e, "记录暂停状态失败"),
        }
    }

    async fn persist_error(&self, error: SyncError) -> SongResult {
        let class = error.class();
        let message = error.to_string();
        tracing::error!(
            playlist_id = %self.playlist_id,
            song_id = %self.song.id,
            class = ?class,
            error = %message,
            "歌曲下载失败"
        );

        let state = match self.ctx.store.get(&self.playlist_id, &self.song.id) {
            Some(_) => self.ctx.store.mark_error(&self.playlist_id, &self.song.id, &message).await,
            None => self.record_unplanned_error(&message).await,
        };
        match state {
            Ok(state) => self.ctx.emit_song_status(&state),
            Err(e) => tracing::warn!(song_id = %self.song.id, error = %e, "记录失败状态失败"),
        }
        SongResult::Failed {
            error: message,
            class,
        }
    }

    /// 连大小都没查到就失败（如 404）：按元数据大小（若有）建档并直接记为 `Error`。
    async fn record_unplanned_error(&self, message: &str) -> Result<DownloadState> {
        self.ctx
            .store
            .record_unplanned_error(&self.playlist_id, &self.song.id, self.song.size, message)
            .await
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
