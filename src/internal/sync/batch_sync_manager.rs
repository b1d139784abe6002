//! 批量同步：歌单按固定大小分批，批与批之间串行，批内并发数受 `BandwidthGate` 限制。
//!
//! 单首歌失败不影响其它歌曲；只有资源类错误（磁盘满、权限不足）会中止整个歌单。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::internal::errors::error_class::ErrorClass;
use crate::internal::storage::structs::DownloadStatus;
use crate::internal::sync::song_coordinator::SongDownloadCoordinator;
use crate::internal::sync::structs::{
    PlaylistOutcome, PlaylistStatus, PlaylistSyncJob, ProgressEvent, SongOutcome, SongRef, SongResult,
};
use crate::internal::sync::sync_context::SyncContext;
use crate::internal::throttle::bandwidth_gate::GatePermit;

pub struct BatchSyncManager {
    ctx: Arc<SyncContext>,
}

/// 一批歌曲运行过程中的汇总。
#[derive(Default)]
struct BatchTally {
    outcomes: Vec<SongOutcome>,
    resource_halt: bool,
    /// 任务 id → 歌曲 id，任务 panic 时仍能把失败归到具体歌曲
    task_songs: HashMap<Id, String>,
}

impl BatchSyncManager {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// 同步整个歌单，直到每首歌都到达终态、被取消或因资源错误中止。
    pub async fn sync(&self, job: &mut PlaylistSyncJob, cancel: &CancellationToken) -> PlaylistOutcome {
        let playlist_id = job.playlist_id.clone();
        let total = job.songs.len();
        let batch_size = self.ctx.config.batch_size.max(1);
        let playlist_cancel = cancel.child_token();

        self.ctx.reset_playlist_snapshot(&playlist_id, total);
        self.emit_playlist_status(&playlist_id, PlaylistStatus::InProgress, 0, 0, total);
        tracing::info!(
            playlist_id,
            songs = total,
            batches = job.batch_count(batch_size),
            "开始同步歌单"
        );

        let mut tally = BatchTally::default();
        let songs = job.songs.clone();
        for (batch_index, batch) in songs.chunks(batch_size).enumerate() {
            job.current_batch_index = batch_index;
            if tally.resource_halt || playlist_cancel.is_cancelled() {
                tally.outcomes.extend(batch.iter().map(cancelled_outcome));
                continue;
            }
            tracing::debug!(playlist_id, batch_index, size = batch.len(), "开始处理批次");
            self.run_batch(job, batch, &playlist_cancel, &mut tally).await;
        }

        let status = aggregate_status(&tally, cancel.is_cancelled() || playlist_cancel.is_cancelled());
        let outcome = PlaylistOutcome {
            playlist_id: playlist_id.clone(),
            status,
            songs: tally.outcomes,
        };
        let (completed, failed) = (outcome.completed(), outcome.failed());
        self.ctx.update_playlist_snapshot(&playlist_id, |snap| {
            snap.completed = completed;
            snap.failed = failed;
            snap.in_progress = 0;
            snap.status = status;
        });
        self.emit_playlist_status(&playlist_id, status, completed, failed, total);
        tracing::info!(playlist_id, ?status, completed, failed, total, "歌单同步结束");
        outcome
    }

    async fn run_batch(
        &self,
        job: &PlaylistSyncJob,
        batch: &[SongRef],
        cancel: &CancellationToken,
        tally: &mut BatchTally,
    ) {
        let mut running: JoinSet<SongOutcome> = JoinSet::new();

        for (position, song) in batch.iter().enumerate() {
            if tally.resource_halt || cancel.is_cancelled() {
                tally.outcomes.extend(batch[position..].iter().map(cancelled_outcome));
                break;
            }
            if let Some(failed) = self.previously_failed(&job.playlist_id, song) {
                self.record(&job.playlist_id, failed, false, tally, cancel);
                continue;
            }

            let Some(permit) = self.admit(&job.playlist_id, song, &mut running, cancel, tally).await else {
                tally.outcomes.extend(batch[position..].iter().map(cancelled_outcome));
                break;
            };
            if tally.resource_halt {
                drop(permit);
                tally.outcomes.extend(batch[position..].iter().map(cancelled_outcome));
                break;
            }

            let coordinator = SongDownloadCoordinator::new(
                Arc::clone(&self.ctx),
                &job.playlist_id,
                &job.base_url,
                song.clone(),
            );
            let song_cancel = cancel.clone();
            self.ctx.update_playlist_snapshot(&job.playlist_id, |snap| snap.in_progress += 1);
            let handle = running.spawn(async move {
                let _permit = permit;
                coordinator.run(&song_cancel).await
            });
            tally.task_songs.insert(handle.id(), song.id.clone());
        }

        while let Some(joined) = running.join_next_with_id().await {
            let outcome = self.unwrap_joined(joined, tally);
            self.record(&job.playlist_id, outcome, true, tally, cancel);
        }
    }

    /// 等待闸门名额；等待期间继续回收已完成的歌曲。取消时返回 `None`。
    async fn admit(
        &self,
        playlist_id: &str,
        song: &SongRef,
        running: &mut JoinSet<SongOutcome>,
        cancel: &CancellationToken,
        tally: &mut BatchTally,
    ) -> Option<GatePermit> {
        let gate = &self.ctx.gate;
        let mut marked_paused = false;
        loop {
            let released = gate.released();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(permit) = gate.try_acquire() {
                return Some(permit);
            }
            if !marked_paused {
                marked_paused = true;
                self.pause_while_queued(playlist_id, &song.id).await;
            }

            tokio::select! {
                _ = &mut released => {}
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    let outcome = self.unwrap_joined(joined, tally);
                    self.record(playlist_id, outcome, true, tally, cancel);
                }
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// 崩溃前处于 `Downloading` 的歌曲在排队期间记为 `Paused`。
    async fn pause_while_queued(&self, playlist_id: &str, song_id: &str) {
        let Some(state) = self.ctx.store.get(playlist_id, song_id) else {
            return;
        };
        if state.status != DownloadStatus::Downloading {
            return;
        }
        match self.ctx.store.mark_paused(playlist_id, song_id).await {
            Ok(paused) => self.ctx.emit_song_status(&paused),
            Err(e) => tracing::warn!(playlist_id, song_id, error = %e, "记录排队暂停失败"),
        }
    }

    /// `Error` 是终态：不重新下载，直接计为失败。
    fn previously_failed(&self, playlist_id: &str, song: &SongRef) -> Option<SongOutcome> {
        let state = self.ctx.store.get(playlist_id, &song.id)?;
        if state.status != DownloadStatus::Error {
            return None;
        }
        Some(SongOutcome {
            song_id: song.id.clone(),
            result: SongResult::Failed {
                error: state.last_error.unwrap_or_else(|| "上次下载失败".to_string()),
                class: ErrorClass::Fatal,
            },
        })
    }

    fn record(
        &self,
        playlist_id: &str,
        outcome: SongOutcome,
        from_task: bool,
        tally: &mut BatchTally,
        cancel: &CancellationToken,
    ) {
        if outcome.is_resource_failure() && !tally.resource_halt {
            tally.resource_halt = true;
            let message = match &outcome.result {
                SongResult::Failed { error, .. } => error.clone(),
                _ => String::new(),
            };
            tracing::error!(playlist_id, song_id = %outcome.song_id, error = %message, "资源错误，中止歌单同步");
            self.ctx.emit(ProgressEvent::ResourceAlert {
                playlist_id: playlist_id.to_string(),
                song_id: outcome.song_id.clone(),
                message,
            });
            cancel.cancel();
        }

        let (completed, failed) = (outcome.is_completed(), outcome.is_failed());
        self.ctx.update_playlist_snapshot(playlist_id, |snap| {
            if completed {
                snap.completed += 1;
            }
            if failed {
                snap.failed += 1;
            }
            if from_task {
                snap.in_progress = snap.in_progress.saturating_sub(1);
            }
        });
        tally.outcomes.push(outcome);
    }

    fn unwrap_joined(&self, joined: Result<(Id, SongOutcome), JoinError>, tally: &mut BatchTally) -> SongOutcome {
        match joined {
            Ok((id, outcome)) => {
                tally.task_songs.remove(&id);
                outcome
            }
            Err(e) => {
                let song_id = tally.task_songs.remove(&e.id()).unwrap_or_default();
                tracing::error!(song_id, error = %e, "歌曲任务异常退出");
                SongOutcome {
                    song_id,
                    result: SongResult::Failed {
                        error: e.to_string(),
                        class: ErrorClass::Fatal,
                    },
                }
            }
        }
    }

    fn emit_playlist_status(&self, playlist_id: &str, status: PlaylistStatus, completed: usize, failed: usize, total: usize) {
        self.ctx.emit(ProgressEvent::PlaylistStatus {
            playlist_id: playlist_id.to_string(),
            status,
            completed,
            failed,
            total,
        });
    }
}

fn cancelled_outcome(song: &SongRef) -> SongOutcome {
    SongOutcome {
        song_id: song.id.clone(),
        result: SongResult::Cancelled,
    }
}

fn aggregate_status(tally: &BatchTally, cancelled: bool) -> PlaylistStatus {
    if tally.resource_halt {
        return PlaylistStatus::ResourceFailure;
    }
    let completed = tally.outcomes.iter().filter(|o| o.is_completed()).count();
    let failed = tally.outcomes.iter().filter(|o| o.is_failed()).count();
    let skipped = tally.outcomes.iter().filter(|o| o.is_cancelled()).count();
    if cancelled || skipped > 0 {
        return PlaylistStatus::Cancelled;
    }
    match (completed, failed) {
        (_, 0) => PlaylistStatus::Synced,
        (0, _) => PlaylistStatus::Failed,
        _ => PlaylistStatus::PartiallyFailed,
    }
}
