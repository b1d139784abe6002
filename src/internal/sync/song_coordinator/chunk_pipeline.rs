//! 分片流水线：派发端并发下载分片，写出端经 `OrderingBuffer` 顺序落盘。
//!
//! 每个分片在派发前占用一个信号量名额，名额随分片一起交给写出端，直到该分片真正写入
//! 暂存文件才归还。因此“传输中 + 等待排序”的分片总数不超过 `max_concurrent_chunks`，
//! 磁盘慢时派发端自然停下，内存不会无限增长。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::internal::chunking::ordering_buffer::OrderingBuffer;
use crate::internal::chunking::structs::{ChunkRange, ChunkResult};
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::sync::structs::{ProgressEvent, SongRef};
use crate::internal::sync::sync_context::SyncContext;
use crate::internal::transfer::chunk_transfer::ChunkRequest;

use crate::internal::chunking::traits::ChunkSink;

struct Delivered {
    chunk: ChunkResult,
    permit: OwnedSemaphorePermit,
}

/// 运行流水线时的参数（形参超过 3 个，用 struct 承载）。
pub(super) struct PipelineParams<'a> {
    pub ctx: &'a Arc<SyncContext>,
    pub playlist_id: &'a str,
    pub song: &'a SongRef,
    pub url: &'a Url,
    pub plan: &'a [ChunkRange],
    pub file_size: u64,
    pub already_written: BTreeSet<usize>,
    pub sink: Box<dyn ChunkSink>,
    pub cancel: &'a CancellationToken,
}

/// 下载并写出全部缺失分片，返回写满后的暂存文件写出端。
pub(super) async fn run_pipeline(params: PipelineParams<'_>) -> Result<Box<dyn ChunkSink>> {
    let PipelineParams {
        ctx,
        playlist_id,
        song,
        url,
        plan,
        file_size,
        already_written,
        sink,
        cancel,
    } = params;

    let job_cancel = cancel.child_token();
    let window = ctx.config.max_concurrent_chunks.max(1);
    let (tx, rx) = mpsc::channel::<Delivered>(window);

    let remaining: Vec<ChunkRange> = plan
        .iter()
        .filter(|r| !already_written.contains(&r.index))
        .copied()
        .collect();
    let done_before = already_written.len();
    let buffer = OrderingBuffer::resume(plan.len(), already_written, sink);

    let dispatch = dispatch_chunks(DispatchParams {
        ctx,
        playlist_id,
        song,
        url,
        remaining,
        file_size,
        window,
        tx,
        cancel: &job_cancel,
    });
    let write = write_chunks(WriteParams {
        ctx,
        playlist_id,
        song_id: &song.id,
        total_chunks: plan.len(),
        done_before,
        buffer,
        rx,
        cancel: &job_cancel,
    });

    let (dispatched, written) = tokio::join!(dispatch, write);

    // 写出端的错误（磁盘满等）比派发端因此收到的取消更有意义
    match (dispatched, written) {
        (_, Err(e)) if !e.class().is_cancelled() => Err(e),
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(buffer)) => {
            if !buffer.is_complete() {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                return Err(SyncError::InvalidState(format!(
                    "{playlist_id}/{} 分片未写满: {}/{}",
                    song.id,
                    buffer.expected_index(),
                    plan.len()
                )));
            }
            Ok(buffer.into_sink())
        }
    }
}

struct DispatchParams<'a> {
    ctx: &'a Arc<SyncContext>,
    playlist_id: &'a str,
    song: &'a SongRef,
    url: &'a Url,
    remaining: Vec<ChunkRange>,
    file_size: u64,
    window: usize,
    tx: mpsc::Sender<Delivered>,
    cancel: &'a CancellationToken,
}

async fn dispatch_chunks(params: DispatchParams<'_>) -> Result<()> {
    let DispatchParams {
        ctx,
        playlist_id,
        song,
        url,
        remaining,
        file_size,
        window,
        tx,
        cancel,
    } = params;

    let semaphore = Arc::new(Semaphore::new(window));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let result = async {
        for range in remaining {
            wait_if_paused(ctx, playlist_id, &song.id, cancel).await?;

            let permit = tokio::select! {
                p = Arc::clone(&semaphore).acquire_owned() => {
                    p.map_err(|_| SyncError::InvalidState("分片信号量已关闭".into()))?
                }
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            };

            let transfer = ctx.transfer.clone();
            let url = url.clone();
            let expected = song.expected_chunk_checksum(range.index).map(str::to_string);
            let tx = tx.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let chunk = transfer
                    .download(ChunkRequest {
                        url: &url,
                        range,
                        total_size: file_size,
                        expected_checksum: expected.as_deref(),
                        cancel: &cancel,
                    })
                    .await?;
                tx.send(Delivered { chunk, permit })
                    .await
                    .map_err(|_| SyncError::Cancelled)
            });

            while let Some(joined) = tasks.try_join_next() {
                joined??;
            }
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        Ok::<(), SyncError>(())
    }
    .await;

    if let Err(e) = &result {
        if !e.class().is_cancelled() {
            tracing::warn!(playlist_id, song_id = %song.id, error = %e, "分片失败，停止该歌曲的其余分片");
        }
        cancel.cancel();
        tasks.abort_all();
    }
    result
}

/// 暂停时把歌曲记为 `Paused`，恢复后回到 `Downloading`。
async fn wait_if_paused(
    ctx: &SyncContext,
    playlist_id: &str,
    song_id: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if !ctx.controller.is_paused().await {
        return Ok(());
    }
    let paused = ctx.store.mark_paused(playlist_id, song_id).await?;
    ctx.emit_song_status(&paused);
    ctx.controller.wait_running(cancel).await?;
    let resumed = ctx.store.mark_downloading(playlist_id, song_id).await?;
    ctx.emit_song_status(&resumed);
    Ok(())
}

struct WriteParams<'a> {
    ctx: &'a SyncContext,
    playlist_id: &'a str,
    song_id: &'a str,
    total_chunks: usize,
    done_before: usize,
    buffer: OrderingBuffer<Box<dyn ChunkSink>>,
    rx: mpsc::Receiver<Delivered>,
    cancel: &'a CancellationToken,
}

async fn write_chunks(params: WriteParams<'_>) -> Result<OrderingBuffer<Box<dyn ChunkSink>>> {
    let WriteParams {
        ctx,
        playlist_id,
        song_id,
        total_chunks,
        done_before,
        mut buffer,
        mut rx,
        cancel,
    } = params;

    let mut done = done_before;
    let mut held: HashMap<usize, OwnedSemaphorePermit> = HashMap::new();
    while let Some(Delivered { chunk, permit }) = rx.recv().await {
        held.insert(chunk.index(), permit);
        let written = match buffer.submit(chunk).await {
            Ok(written) => written,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        for index in written {
            held.remove(&index);
            if let Err(e) = ctx.store.mark_chunk_downloaded(playlist_id, song_id, index).await {
                cancel.cancel();
                return Err(e);
            }
            done += 1;
            ctx.emit(ProgressEvent::ChunkCompleted {
                playlist_id: playlist_id.to_string(),
                song_id: song_id.to_string(),
                chunk_index: index,
                progress_pct: done as f64 * 100.0 / total_chunks.max(1) as f64,
            });
        }
    }
    Ok(buffer)
}

