//! 歌单批量同步测试（引擎级）
//!
//! 测试项：
//! - 单首失败不影响其它歌曲，结果为部分失败
//! - 并发闸门：任意时刻处于 Downloading 的歌曲不超过上限
//! - 分批处理
//! - 停止歌单、暂停 / 恢复
//! - 失败歌曲的显式重试、删除歌单
//! - 删除正在同步的歌单：等同步退出后再删，记录不会被写回
//! - 磁盘写满：发出资源告警，停止放行并取消同批歌曲
//! - 关闭引擎后进度快照的监听者收到关闭通知
//! - 启动后续传未完成的歌单
//! - HTTP 元数据来源

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::chunking::{ChunkResult, ChunkSink};
use crate::errors::{Result, SyncError};
use crate::states::unlock_reactive::UnlockReactivePropertyError;
use crate::storage::{DownloadStatus, TempFileManager};
use crate::sync::{
    FileSinkFactory, HttpPlaylistSource, PlaylistRef, PlaylistSource, PlaylistStatus, ProgressEvent, SongRef,
    StagingSinkFactory,
};
use crate::tests::{
    mount_file, mount_missing, mount_slow_file, payload, peak_downloading, playlist, requested_ranges, song,
    song_statuses, test_engine,
};

/// 两个分片的小文件
const SMALL: usize = 300_000;

/// 在源站挂载 `count` 首歌并返回元数据。
async fn mount_songs(server: &MockServer, count: usize) -> Vec<SongRef> {
    let mut songs = Vec::with_capacity(count);
    for i in 0..count {
        let body = payload(SMALL + i);
        let file_name = format!("song-{i}.mp3");
        mount_file(server, &file_name, body.clone()).await;
        songs.push(song(&format!("s{i}"), &file_name, &body));
    }
    songs
}

struct StaticSource(PlaylistRef);

/// 指定歌曲的暂存文件一写就报磁盘已满，其余歌曲照常落盘。
#[derive(Debug)]
struct DiskFullFor {
    song_id: &'static str,
    files: FileSinkFactory,
}

struct DiskFullSink {
    path: PathBuf,
}

#[async_trait]
impl ChunkSink for DiskFullSink {
    async fn write_chunk(&mut self, _chunk: &ChunkResult) -> Result<()> {
        Err(SyncError::io(&self.path, std::io::Error::from(std::io::ErrorKind::StorageFull)))
    }
}

#[async_trait]
impl StagingSinkFactory for DiskFullFor {
    async fn open(&self, staging_path: &Path, file_size: u64) -> Result<Box<dyn ChunkSink>> {
        let name = staging_path.file_name().unwrap().to_string_lossy();
        if name.starts_with(&format!("{}.", self.song_id)) {
            return Ok(Box::new(DiskFullSink {
                path: staging_path.to_path_buf(),
            }));
        }
        self.files.open(staging_path, file_size).await
    }
}

#[async_trait]
impl PlaylistSource for StaticSource {
    async fn fetch_playlist(&self, _playlist_id: &str) -> Result<PlaylistRef> {
        Ok(self.0.clone())
    }
}

// ═══════════════════════════ 部分失败 ═══════════════════════════

#[tokio::test]
async fn one_missing_song_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = mount_songs(&server, 4).await;
    mount_missing(&server, "gone.mp3").await;
    songs.insert(2, SongRef::new("gone", "gone.mp3"));
    let (engine, mut events) = test_engine(dir.path(), |b| b).await;

    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();

    assert_eq!(outcome.status, PlaylistStatus::PartiallyFailed);
    assert_eq!(outcome.completed(), 4);
    assert_eq!(outcome.failed(), 1);
    assert!(outcome.song("gone").unwrap().is_failed());

    let states = engine.states("p1");
    assert_eq!(states.iter().filter(|s| s.status == DownloadStatus::Completed).count(), 4);
    assert_eq!(states.iter().filter(|s| s.status == DownloadStatus::Error).count(), 1);

    let last = events.drain().into_iter().last().unwrap();
    assert_eq!(
        last,
        ProgressEvent::PlaylistStatus {
            playlist_id: "p1".into(),
            status: PlaylistStatus::PartiallyFailed,
            completed: 4,
            failed: 1,
            total: 5,
        }
    );
}

#[tokio::test]
async fn all_missing_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_missing(&server, "a.mp3").await;
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    let outcome = engine
        .sync_playlist(&playlist("p1", &server, vec![SongRef::new("a", "a.mp3")]))
        .await
        .unwrap();
    assert_eq!(outcome.status, PlaylistStatus::Failed);
}

// ═══════════════════════════ 并发闸门 ═══════════════════════════

#[tokio::test]
async fn gate_caps_concurrent_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = Vec::new();
    for i in 0..10 {
        let body = payload(SMALL);
        let file_name = format!("song-{i}.mp3");
        mount_slow_file(&server, &file_name, body.clone(), Duration::from_millis(20)).await;
        songs.push(song(&format!("s{i}"), &file_name, &body));
    }
    let (engine, mut events) = test_engine(dir.path(), |b| b.max_concurrent_downloads(3)).await;

    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(outcome.status, PlaylistStatus::Synced);
    assert_eq!(outcome.completed(), 10);

    let events = events.drain();
    let peak = peak_downloading(&events);
    assert!(peak <= 3, "同时下载的歌曲数峰值为 {peak}");
    assert!(peak >= 1);
    assert_eq!(engine.context().gate().in_use(), 0);
}

#[tokio::test]
async fn songs_are_processed_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let songs = mount_songs(&server, 5).await;
    let (engine, _events) = test_engine(dir.path(), |b| b.batch_size(2)).await;

    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(outcome.status, PlaylistStatus::Synced);
    assert_eq!(outcome.songs.len(), 5);

    let snapshot = engine.progress().get_current().unwrap();
    let p1 = snapshot.playlist("p1").unwrap();
    assert_eq!((p1.total_songs, p1.completed, p1.failed, p1.in_progress), (5, 5, 0, 0));
    assert_eq!(p1.status, PlaylistStatus::Synced);
}

#[tokio::test]
async fn duplicate_song_ids_are_synced_once() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = mount_songs(&server, 2).await;
    songs.push(songs[0].clone());
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(outcome.songs.len(), 2);
    assert_eq!(requested_ranges(&server).await.len(), 4);
}

// ═══════════════════════════ 停止与暂停 ═══════════════════════════

#[tokio::test]
async fn stop_playlist_cancels_without_errors() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = Vec::new();
    for i in 0..4 {
        let body = payload(SMALL);
        let file_name = format!("song-{i}.mp3");
        mount_slow_file(&server, &file_name, body.clone(), Duration::from_millis(200)).await;
        songs.push(song(&format!("s{i}"), &file_name, &body));
    }
    let (engine, _events) = test_engine(dir.path(), |b| b.max_concurrent_downloads(2)).await;
    assert!(!engine.stop_playlist("p1"));

    let pl = playlist("p1", &server, songs);
    let (outcome, stopped) = tokio::join!(engine.sync_playlist(&pl), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.stop_playlist("p1")
    });

    assert!(stopped);
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, PlaylistStatus::Cancelled);
    assert_eq!(outcome.completed(), 0);
    assert_eq!(outcome.failed(), 0);
    assert!(
        engine
            .states("p1")
            .iter()
            .all(|s| s.status != DownloadStatus::Error)
    );
    assert_eq!(engine.context().gate().in_use(), 0);
}

#[tokio::test]
async fn pause_holds_chunks_until_resume() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let songs = mount_songs(&server, 2).await;
    let (engine, mut events) = test_engine(dir.path(), |b| b).await;

    engine.controller().pause().await;
    let pl = playlist("p1", &server, songs);
    let (outcome, ranges_while_paused) = tokio::join!(engine.sync_playlist(&pl), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let ranges = requested_ranges(&server).await.len();
        engine.controller().resume().await;
        ranges
    });

    assert_eq!(ranges_while_paused, 0, "暂停期间不应派发分片");
    assert_eq!(outcome.unwrap().status, PlaylistStatus::Synced);
    let statuses = song_statuses(&events.drain(), "s0");
    assert!(statuses.contains(&DownloadStatus::Paused));
    assert_eq!(statuses.last(), Some(&DownloadStatus::Completed));
}

#[tokio::test]
async fn engine_cancel_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let songs = mount_songs(&server, 3).await;
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    engine.controller().cancel();
    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(outcome.status, PlaylistStatus::Cancelled);
    assert_eq!(outcome.cancelled(), 3);
    assert!(requested_ranges(&server).await.is_empty());
}

// ═══════════════════════════ 重试与删除 ═══════════════════════════

#[tokio::test]
async fn retry_failed_allows_errored_song_to_sync() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = mount_songs(&server, 2).await;
    let late_body = payload(SMALL);
    mount_missing(&server, "late.mp3").await;
    songs.push(song("late", "late.mp3", &late_body));
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    let first = engine.sync_playlist(&playlist("p1", &server, songs.clone())).await.unwrap();
    assert_eq!(first.status, PlaylistStatus::PartiallyFailed);

    // 再次同步时 Error 歌曲不会自动重试
    let second = engine.sync_playlist(&playlist("p1", &server, songs.clone())).await.unwrap();
    assert_eq!(second.status, PlaylistStatus::PartiallyFailed);

    server.reset().await;
    for (i, s) in songs.iter().take(2).enumerate() {
        mount_file(&server, &s.file_path, payload(SMALL + i)).await;
    }
    mount_file(&server, "late.mp3", late_body.clone()).await;

    assert_eq!(engine.retry_failed("p1").await.unwrap(), 1);
    let third = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(third.status, PlaylistStatus::Synced);
    assert_eq!(requested_ranges(&server).await.len(), 2, "只有重新初始化的歌曲会下载");
}

#[tokio::test]
async fn remove_playlist_drops_records() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let songs = mount_songs(&server, 3).await;
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();
    assert_eq!(engine.remove_playlist("p1").await.unwrap(), 3);
    assert!(engine.states("p1").is_empty());
    assert!(engine.progress().get_current().unwrap().playlist("p1").is_none());
}

#[tokio::test]
async fn removing_a_syncing_playlist_waits_for_it_to_exit() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = Vec::new();
    for i in 0..3 {
        let body = payload(SMALL);
        let file_name = format!("song-{i}.mp3");
        mount_slow_file(&server, &file_name, body.clone(), Duration::from_millis(200)).await;
        songs.push(song(&format!("s{i}"), &file_name, &body));
    }
    let (engine, _events) = test_engine(dir.path(), |b| b.max_concurrent_downloads(3)).await;

    // 300ms 时大小已确认、分片正在传输，记录已经建立
    let pl = playlist("p1", &server, songs);
    let (outcome, removed) = tokio::join!(engine.sync_playlist(&pl), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!engine.states("p1").is_empty());
        engine.remove_playlist("p1").await
    });

    assert_eq!(outcome.unwrap().status, PlaylistStatus::Cancelled);
    assert!(removed.unwrap() > 0);
    assert!(engine.states("p1").is_empty());
    assert!(engine.context().store().playlists_with_incomplete().is_empty());
    assert_eq!(engine.context().gate().in_use(), 0);
}

#[tokio::test]
async fn removing_during_a_stalled_size_check_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let body = payload(SMALL);
    mount_slow_file(&server, "song-0.mp3", body.clone(), Duration::from_secs(8)).await;
    let (engine, _events) = test_engine(dir.path(), |b| b).await;

    let pl = playlist("p1", &server, vec![song("s0", "song-0.mp3", &body)]);
    let started = std::time::Instant::now();
    let (outcome, removed) = tokio::join!(engine.sync_playlist(&pl), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.remove_playlist("p1").await
    });

    assert!(started.elapsed() < Duration::from_secs(3), "删除不应等到源站响应");
    assert_eq!(outcome.unwrap().status, PlaylistStatus::Cancelled);
    assert_eq!(removed.unwrap(), 0);
    assert!(engine.states("p1").is_empty());
    assert!(engine.context().store().playlists_with_incomplete().is_empty());
}

// ═══════════════════════════ 资源错误 ═══════════════════════════

#[tokio::test]
async fn disk_full_halts_admission_and_cancels_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let mut songs = Vec::new();
    for i in 0..4 {
        let body = payload(SMALL);
        let file_name = format!("song-{i}.mp3");
        if i == 0 {
            mount_file(&server, &file_name, body.clone()).await;
        } else {
            mount_slow_file(&server, &file_name, body.clone(), Duration::from_millis(500)).await;
        }
        songs.push(song(&format!("s{i}"), &file_name, &body));
    }
    let sinks = Arc::new(DiskFullFor {
        song_id: "s0",
        files: FileSinkFactory::new(TempFileManager::new(Duration::from_secs(3600))),
    });
    let (engine, mut events) =
        test_engine(dir.path(), |b| b.max_concurrent_downloads(2).staging_sinks(sinks)).await;

    let outcome = engine.sync_playlist(&playlist("p1", &server, songs)).await.unwrap();

    assert_eq!(outcome.status, PlaylistStatus::ResourceFailure);
    assert!(outcome.song("s0").unwrap().is_resource_failure());
    for id in ["s1", "s2", "s3"] {
        assert!(outcome.song(id).unwrap().is_cancelled(), "{id} 应被取消");
    }

    let alerts: Vec<_> = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::ResourceAlert { song_id, .. } if song_id == "s0"))
        .collect();
    assert_eq!(alerts.len(), 1);

    // 闸门停止放行：排在后面的歌曲一个请求都没发
    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(paths.iter().all(|p| !p.ends_with("song-2.mp3") && !p.ends_with("song-3.mp3")));

    let s0 = engine.context().store().get("p1", "s0").unwrap();
    assert_eq!(s0.status, DownloadStatus::Error);
    assert!(engine.states("p1").iter().all(|s| s.song_id == "s0" || s.status != DownloadStatus::Error));
    assert_eq!(engine.context().gate().in_use(), 0);
}

#[tokio::test]
async fn shutdown_closes_progress_watchers() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _events) = test_engine(dir.path(), |b| b).await;
    let mut watcher = engine.progress().watch();

    engine.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(1), watcher.changed())
        .await
        .expect("关闭后监听者应立即返回");
    assert!(matches!(result, Err(UnlockReactivePropertyError::WatcherClosed)));
}

// ═══════════════════════════ 续传与元数据 ═══════════════════════════

#[tokio::test]
async fn resume_incomplete_picks_up_unfinished_playlists() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let songs = mount_songs(&server, 2).await;
    {
        let (engine, _events) = test_engine(dir.path(), |b| b).await;
        engine
            .context()
            .store()
            .initialize("p1", "s0", (SMALL) as u64)
            .await
            .unwrap();
        engine.shutdown().await;
    }

    let (engine, _events) = test_engine(dir.path(), |b| b).await;
    let source = StaticSource(playlist("p1", &server, songs));
    let outcomes = engine.resume_incomplete(&source).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, PlaylistStatus::Synced);
    assert!(engine.context().store().playlists_with_incomplete().is_empty());
}

#[tokio::test]
async fn http_source_reads_playlist_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlists/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "_id": "p1",
            "name": "晨间",
            "baseUrl": format!("{}/media", server.uri()),
            "songs": [
                { "_id": "s1", "name": "一", "filePath": "artist\\one.flac", "size": 10 },
                { "_id": "s2", "filePath": "two.mp3" }
            ]
        })))
        .mount(&server)
        .await;

    let api = Url::parse(&format!("{}/api", server.uri())).unwrap();
    let source = HttpPlaylistSource::new(reqwest::Client::new(), api);
    let pl = source.fetch_playlist("p1").await.unwrap();

    assert_eq!(pl.id, "p1");
    assert_eq!(pl.songs.len(), 2);
    assert_eq!(pl.songs[0].file_path, "artist\\one.flac");
    assert_eq!(pl.songs[0].size, Some(10));
    assert_eq!(pl.songs[1].size, None);

    assert!(source.fetch_playlist("missing").await.is_err());
}
