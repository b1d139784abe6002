//! 分片规划：按文件大小分档决定分片大小，结果只依赖文件大小，崩溃后可完全复现。

use crate::internal::chunking::structs::ChunkRange;
use crate::internal::errors::sync_error::{Result, SyncError};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// 小于 10MB 的文件：256KB 一片
pub const SMALL_FILE_LIMIT: u64 = 10 * MB;
/// 小于 100MB 的文件：1MB 一片
pub const MEDIUM_FILE_LIMIT: u64 = 100 * MB;

pub const SMALL_CHUNK_SIZE: u64 = 256 * KB;
pub const MEDIUM_CHUNK_SIZE: u64 = MB;
pub const LARGE_CHUNK_SIZE: u64 = 2 * MB;

pub struct ChunkPlanner;

impl ChunkPlanner {
    /// 给定文件大小对应的分片大小。
    pub fn chunk_size_for(file_size: u64) -> u64 {
        if file_size < SMALL_FILE_LIMIT {
            SMALL_CHUNK_SIZE
        } else if file_size < MEDIUM_FILE_LIMIT {
            MEDIUM_CHUNK_SIZE
        } else {
            LARGE_CHUNK_SIZE
        }
    }

    /// 覆盖 `[0, file_size)` 的有序分片，无空洞、无重叠。
    pub fn plan(file_size: i64) -> Result<Vec<ChunkRange>> {
        if file_size <= 0 {
            return Err(SyncError::EmptyPlan { file_size });
        }
        let size = file_size as u64;
        let chunk_size = Self::chunk_size_for(size);

        let mut ranges = Vec::with_capacity(size.div_ceil(chunk_size) as usize);
        let mut start = 0u64;
        while start < size {
            let end = (start + chunk_size).min(size) - 1;
            ranges.push(ChunkRange {
                index: ranges.len(),
                start,
                end,
            });
            start = end + 1;
        }
        Ok(ranges)
    }

    /// 分片数量，不分配完整列表。
    pub fn chunk_count(file_size: u64) -> usize {
        if file_size == 0 {
            return 0;
        }
        file_size.div_ceil(Self::chunk_size_for(file_size)) as usize
    }
}
