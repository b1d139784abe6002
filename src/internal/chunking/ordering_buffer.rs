//! 乱序到达、顺序写出：分片可能以任意顺序完成，写出目标只会看到严格递增的序号。

use std::collections::{BTreeMap, BTreeSet};

use crate::internal::chunking::structs::ChunkResult;
use crate::internal::chunking::traits::ChunkSink;
use crate::internal::errors::sync_error::{Result, SyncError};

pub struct OrderingBuffer<S: ChunkSink> {
    total_chunks: usize,
    expected_index: usize,
    pending: BTreeMap<usize, ChunkResult>,
    /// 续传时已经落盘的分片，写出时跳过
    already_written: BTreeSet<usize>,
    sink: S,
}

impl<S: ChunkSink> OrderingBuffer<S> {
    pub fn new(total_chunks: usize, sink: S) -> Self {
        Self::resume(total_chunks, BTreeSet::new(), sink)
    }

    /// 从已落盘的分片集合恢复：`expected_index` 直接越过已存在的前缀。
    pub fn resume(total_chunks: usize, already_written: BTreeSet<usize>, sink: S) -> Self {
        let mut buffer = Self {
            total_chunks,
            expected_index: 0,
            pending: BTreeMap::new(),
            already_written,
            sink,
        };
        buffer.skip_written();
        buffer
    }

    /// 提交一个完成的分片，返回本次实际写出的分片序号（按写出顺序）。
    ///
    /// 已写出或已在缓冲中的序号被忽略（网络重试可能重复上报）。
    pub async fn submit(&mut self, chunk: ChunkResult) -> Result<Vec<usize>> {
        let index = chunk.index();
        if index >= self.total_chunks {
            return Err(SyncError::InvalidChunkIndex {
                index,
                total: self.total_chunks,
            });
        }
        if index < self.expected_index
            || self.already_written.contains(&index)
            || self.pending.contains_key(&index)
        {
            tracing::debug!(chunk_index = index, "重复分片，忽略");
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        if index != self.expected_index {
            self.pending.insert(index, chunk);
            return Ok(written);
        }

        self.sink.write_chunk(&chunk).await?;
        written.push(index);
        self.expected_index += 1;
        self.skip_written();

        while let Some(next) = self.pending.remove(&self.expected_index) {
            self.sink.write_chunk(&next).await?;
            written.push(next.index());
            self.expected_index += 1;
            self.skip_written();
        }
        Ok(written)
    }

    pub fn is_complete(&self) -> bool {
        self.expected_index == self.total_chunks
    }

    pub fn expected_index(&self) -> usize {
        self.expected_index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn skip_written(&mut self) {
        while self.expected_index < self.total_chunks
            && self.already_written.contains(&self.expected_index)
        {
            self.expected_index += 1;
        }
    }
}
