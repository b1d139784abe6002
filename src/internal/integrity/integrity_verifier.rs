//! 完整性校验：分片摘要在传输时计算，整文件摘要在全部写完后流式计算。
//!
//! 分片与文件都使用 SHA-256 十六进制小写摘要。
//! 分片校验只有在服务端给出期望值时才生效，否则只记录摘要。

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::internal::errors::sync_error::{Result, SyncError};

const READ_BUF_SIZE: usize = 64 * 1024;

/// 整文件校验的结果摘要。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    pub sha256: String,
}

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn chunk_checksum(bytes: &[u8]) -> String {
        to_hex(&Sha256::digest(bytes))
    }

    /// 校验单个分片；`expected` 为空时直接通过。
    pub fn verify_chunk(chunk_index: usize, actual: &str, expected: Option<&str>) -> Result<()> {
        match expected {
            Some(expected) if !expected.eq_ignore_ascii_case(actual) => {
                Err(SyncError::ChunkChecksumMismatch {
                    chunk_index,
                    expected: expected.to_ascii_lowercase(),
                    actual: actual.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// 流式计算文件的大小与摘要，不把整个文件读入内存。
    pub async fn file_checksum(path: &Path) -> Result<FileDigest> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).await.map_err(|e| SyncError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(FileDigest {
            size,
            sha256: to_hex(&hasher.finalize()),
        })
    }

    /// 校验组装后的文件：大小必须等于期望值，给出期望摘要时摘要也必须一致。
    pub async fn verify_file(
        song_id: &str,
        path: &Path,
        expected_size: u64,
        expected_checksum: Option<&str>,
    ) -> Result<FileDigest> {
        let digest = Self::file_checksum(path).await?;
        if digest.size != expected_size {
            return Err(SyncError::FileChecksumMismatch {
                song_id: song_id.to_string(),
                expected: format!("{expected_size} 字节"),
                actual: format!("{} 字节", digest.size),
            });
        }
        if let Some(expected) = expected_checksum {
            if !expected.eq_ignore_ascii_case(&digest.sha256) {
                return Err(SyncError::FileChecksumMismatch {
                    song_id: song_id.to_string(),
                    expected: expected.to_ascii_lowercase(),
                    actual: digest.sha256,
                });
            }
        }
        Ok(digest)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
