//! 暂存文件写出端：按分片起始偏移定位写入并同步到磁盘，每次写入刷新暂存文件的访问时间。

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::internal::chunking::structs::ChunkResult;
use crate::internal::chunking::traits::ChunkSink;
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::storage::temp_file_manager::TempFileManager;
use crate::internal::sync::traits::StagingSinkFactory;

pub struct StagingSink {
    file: File,
    path: PathBuf,
    temp_files: TempFileManager,
}

impl StagingSink {
    /// 打开暂存文件并预分配到文件总大小；已有内容保留，用于续传。
    pub async fn open(path: &Path, file_size: u64, temp_files: TempFileManager) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        file.set_len(file_size).await.map_err(|e| SyncError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            temp_files,
        })
    }
}

#[async_trait]
impl ChunkSink for StagingSink {
    async fn write_chunk(&mut self, chunk: &ChunkResult) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(chunk.range.start))
            .await
            .map_err(|e| SyncError::io(&self.path, e))?;
        self.file
            .write_all(&chunk.bytes)
            .await
            .map_err(|e| SyncError::io(&self.path, e))?;
        // 分片序号随后会被记为已落盘，字节必须先到达磁盘
        self.file.flush().await.map_err(|e| SyncError::io(&self.path, e))?;
        self.file.sync_data().await.map_err(|e| SyncError::io(&self.path, e))?;
        self.temp_files.touch(&self.path);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await.map_err(|e| SyncError::io(&self.path, e))?;
        self.file.sync_all().await.map_err(|e| SyncError::io(&self.path, e))?;
        Ok(())
    }
}

/// 默认的写出端来源：本地暂存文件。
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    temp_files: TempFileManager,
}

impl FileSinkFactory {
    pub fn new(temp_files: TempFileManager) -> Self {
        Self { temp_files }
    }
}

#[async_trait]
impl StagingSinkFactory for FileSinkFactory {
    async fn open(&self, staging_path: &Path, file_size: u64) -> Result<Box<dyn ChunkSink>> {
        let sink = StagingSink::open(staging_path, file_size, self.temp_files.clone()).await?;
        Ok(Box::new(sink))
    }
}
