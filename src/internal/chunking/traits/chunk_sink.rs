use async_trait::async_trait;

use crate::internal::chunking::structs::ChunkResult;
use crate::internal::errors::sync_error::Result;

/// 有序写出的目标。`OrderingBuffer` 保证按分片序号严格递增调用 `write_chunk`。
#[async_trait]
pub trait ChunkSink: Send {
    async fn write_chunk(&mut self, chunk: &ChunkResult) -> Result<()>;

    /// 全部分片写完、整文件校验之前调用。
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for Box<dyn ChunkSink> {
    async fn write_chunk(&mut self, chunk: &ChunkResult) -> Result<()> {
        (**self).write_chunk(chunk).await
    }

    async fn finish(&mut self) -> Result<()> {
        (**self).finish().await
    }
}

/// 内存目标，测试与小文件用。
#[async_trait]
impl ChunkSink for Vec<u8> {
    async fn write_chunk(&mut self, chunk: &ChunkResult) -> Result<()> {
        self.extend_from_slice(&chunk.bytes);
        Ok(())
    }
}
