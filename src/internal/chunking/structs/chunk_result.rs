use bytes::Bytes;

use super::chunk_range::ChunkRange;

/// 一次成功的分片传输结果，由 [`OrderingBuffer`](crate::internal::chunking::ordering_buffer::OrderingBuffer) 恰好消费一次。
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub range: ChunkRange,
    pub bytes: Bytes,
    /// SHA-256 十六进制摘要
    pub checksum: String,
}

impl ChunkResult {
    pub fn index(&self) -> usize {
        self.range.index
    }
}
