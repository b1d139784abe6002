//! 分片规划测试
//!
//! 测试项：
//! - 分档：<10MB 用 256KB，<100MB 用 1MB，其余 2MB
//! - 分片首尾相接、无空洞无重叠，覆盖整个文件
//! - 非正大小拒绝规划

use crate::chunking::{
    ChunkPlanner, LARGE_CHUNK_SIZE, MEDIUM_CHUNK_SIZE, MEDIUM_FILE_LIMIT, SMALL_CHUNK_SIZE, SMALL_FILE_LIMIT,
};
use crate::errors::SyncError;

const MB: u64 = 1024 * 1024;

fn assert_covers(file_size: u64) {
    let plan = ChunkPlanner::plan(file_size as i64).unwrap();
    assert_eq!(plan.first().unwrap().start, 0);
    assert_eq!(plan.last().unwrap().end, file_size - 1);
    for (i, pair) in plan.windows(2).enumerate() {
        assert_eq!(pair[0].index, i);
        assert_eq!(pair[0].end + 1, pair[1].start, "分片 {i} 与下一片之间有空洞或重叠");
    }
    let total: u64 = plan.iter().map(|r| r.len()).sum();
    assert_eq!(total, file_size);
    assert_eq!(plan.len(), ChunkPlanner::chunk_count(file_size));
}

// ═══════════════════════════ 分档 ═══════════════════════════

#[test]
fn chunk_size_tiers() {
    assert_eq!(ChunkPlanner::chunk_size_for(1), SMALL_CHUNK_SIZE);
    assert_eq!(ChunkPlanner::chunk_size_for(SMALL_FILE_LIMIT - 1), SMALL_CHUNK_SIZE);
    assert_eq!(ChunkPlanner::chunk_size_for(SMALL_FILE_LIMIT), MEDIUM_CHUNK_SIZE);
    assert_eq!(ChunkPlanner::chunk_size_for(MEDIUM_FILE_LIMIT - 1), MEDIUM_CHUNK_SIZE);
    assert_eq!(ChunkPlanner::chunk_size_for(MEDIUM_FILE_LIMIT), LARGE_CHUNK_SIZE);
}

#[test]
fn five_megabyte_song_uses_small_chunks() {
    let plan = ChunkPlanner::plan((5 * MB) as i64).unwrap();
    assert_eq!(plan.len(), 20);
    assert!(plan.iter().all(|r| r.len() == SMALL_CHUNK_SIZE));
}

#[test]
fn last_chunk_is_short() {
    let size = 4 * SMALL_CHUNK_SIZE + 1000;
    let plan = ChunkPlanner::plan(size as i64).unwrap();
    assert_eq!(plan.len(), 5);
    assert_eq!(plan[4].len(), 1000);
    assert_eq!(plan[4].header_value(), format!("bytes={}-{}", 4 * SMALL_CHUNK_SIZE, size - 1));
}

// ═══════════════════════════ 覆盖 ═══════════════════════════

#[test]
fn plans_cover_file_without_gaps() {
    for size in [1, 2, SMALL_CHUNK_SIZE - 1, SMALL_CHUNK_SIZE, SMALL_CHUNK_SIZE + 1, 12 * MB + 7, 150 * MB + 3] {
        assert_covers(size);
    }
}

#[test]
fn single_byte_file_is_one_chunk() {
    let plan = ChunkPlanner::plan(1).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!((plan[0].start, plan[0].end), (0, 0));
}

#[test]
fn plan_is_deterministic() {
    let size = (37 * MB + 12345) as i64;
    assert_eq!(ChunkPlanner::plan(size).unwrap(), ChunkPlanner::plan(size).unwrap());
}

// ═══════════════════════════ 非法输入 ═══════════════════════════

#[test]
fn non_positive_size_is_rejected() {
    for size in [0, -1] {
        assert!(matches!(
            ChunkPlanner::plan(size),
            Err(SyncError::EmptyPlan { file_size }) if file_size == size
        ));
    }
    assert_eq!(ChunkPlanner::chunk_count(0), 0);
}
