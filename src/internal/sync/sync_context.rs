//! 引擎持有的协作者集合，以 `Arc` 句柄传给批量管理器与单曲协调器。
//! 限速器与并发闸门是跨歌曲共享的唯一可变状态。

use std::sync::Arc;

use crate::internal::config::sync_config::SyncConfig;
use crate::internal::errors::sync_error::Result;
use crate::internal::states::queue_reactive::{QueueReactiveConsumer, QueueReactiveProperty};
use crate::internal::states::unlock_reactive::UnlockReactiveProperty;
use crate::internal::storage::download_state_store::DownloadStateStore;
use crate::internal::storage::structs::DownloadState;
use crate::internal::storage::temp_file_manager::TempFileManager;
use crate::internal::sync::song_coordinator::FileSinkFactory;
use crate::internal::sync::structs::{PlaylistSnapshot, ProgressEvent, SyncSnapshot};
use crate::internal::sync::sync_controller::SyncController;
use crate::internal::sync::traits::StagingSinkFactory;
use crate::internal::throttle::bandwidth_gate::BandwidthGate;
use crate::internal::throttle::throttle_controller::ThrottleController;
use crate::internal::transfer::chunk_transfer::ChunkTransfer;
use crate::internal::transfer::retry_policy::RetryPolicy;

/// 进度事件接收端，交给外部消息总线适配器消费。
#[derive(Debug)]
pub struct ProgressReceiver {
    consumer: QueueReactiveConsumer<ProgressEvent>,
}

impl ProgressReceiver {
    /// 等待下一条事件；引擎被丢弃后返回 `None`。
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.consumer.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.consumer.try_recv()
    }

    /// 取出当前已排队的全部事件。
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        self.consumer.drain()
    }
}

#[derive(Debug)]
pub struct SyncContext {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<DownloadStateStore>,
    pub(crate) temp_files: TempFileManager,
    pub(crate) throttle: Arc<ThrottleController>,
    pub(crate) gate: BandwidthGate,
    pub(crate) transfer: ChunkTransfer,
    pub(crate) file_policy: RetryPolicy,
    pub(crate) controller: SyncController,
    pub(crate) sinks: Arc<dyn StagingSinkFactory>,
    events: QueueReactiveProperty<ProgressEvent>,
    snapshot: UnlockReactiveProperty<SyncSnapshot>,
}

impl SyncContext {
    /// 按配置组装全部协作者，返回上下文与进度事件接收端。
    pub fn new(config: SyncConfig, client: reqwest::Client) -> Result<(Self, ProgressReceiver)> {
        config.validate()?;
        let store = Arc::new(DownloadStateStore::open(config.state_file.clone())?);
        let throttle = Arc::new(ThrottleController::new(config.max_bytes_per_second));
        let transfer = ChunkTransfer::new(
            client,
            Arc::clone(&throttle),
            RetryPolicy::chunks_from_config(&config),
            config.chunk_timeout(),
        );
        let (events, consumer) = QueueReactiveProperty::new();
        let temp_files = TempFileManager::new(config.orphan_ttl());
        let ctx = Self {
            store,
            sinks: Arc::new(FileSinkFactory::new(temp_files.clone())),
            temp_files,
            throttle,
            gate: BandwidthGate::new(config.max_concurrent_downloads),
            transfer,
            file_policy: RetryPolicy::for_whole_file(config.max_file_retries),
            controller: SyncController::new(),
            events,
            snapshot: UnlockReactiveProperty::new(SyncSnapshot::default()),
            config,
        };
        Ok((ctx, ProgressReceiver { consumer }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &DownloadStateStore {
        &self.store
    }

    pub fn temp_files(&self) -> &TempFileManager {
        &self.temp_files
    }

    pub fn gate(&self) -> &BandwidthGate {
        &self.gate
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    pub fn snapshot(&self) -> UnlockReactiveProperty<SyncSnapshot> {
        self.snapshot.clone()
    }

    /// 推送进度事件；没有消费者时丢弃。
    pub(crate) fn emit(&self, event: ProgressEvent) {
        tracing::trace!(?event, "进度事件");
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_song_status(&self, state: &DownloadState) {
        self.emit(ProgressEvent::SongStatus {
            playlist_id: state.playlist_id.clone(),
            song_id: state.song_id.clone(),
            status: state.status,
            progress_pct: state.progress_pct,
            error: state.last_error.clone(),
        });
    }

    pub(crate) fn update_playlist_snapshot<F>(&self, playlist_id: &str, f: F)
    where
        F: FnOnce(&mut PlaylistSnapshot),
    {
        let _ = self.snapshot.update_field(|snap| {
            if let Some(p) = snap.playlists.get_mut(playlist_id) {
                f(p);
            }
        });
    }

    pub(crate) fn reset_playlist_snapshot(&self, playlist_id: &str, total_songs: usize) {
        let _ = self.snapshot.update_field(|snap| {
            snap.playlists
                .insert(playlist_id.to_string(), PlaylistSnapshot::new(total_songs));
        });
    }

    pub(crate) fn remove_playlist_snapshot(&self, playlist_id: &str) {
        let _ = self.snapshot.update_field(|snap| {
            snap.playlists.remove(playlist_id);
        });
    }
}
