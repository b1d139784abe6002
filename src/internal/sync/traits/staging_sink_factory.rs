use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use crate::internal::chunking::traits::ChunkSink;
use crate::internal::errors::sync_error::Result;

/// 为每次下载尝试打开暂存写出端。默认写本地暂存文件，嵌入方可以替换。
#[async_trait]
pub trait StagingSinkFactory: Send + Sync + Debug {
    async fn open(&self, staging_path: &Path, file_size: u64) -> Result<Box<dyn ChunkSink>>;
}
