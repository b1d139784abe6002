//! 发起单段 Range 请求并完整读出分片数据。

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;

use crate::internal::chunking::structs::ChunkResult;
use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::integrity::integrity_verifier::IntegrityVerifier;

use super::ChunkRequest;

/// 服务端可选返回的分片摘要响应头（SHA-256 十六进制）
pub const CHUNK_CHECKSUM_HEADER: &str = "x-chunk-checksum";

pub(super) async fn fetch_range(client: &reqwest::Client, req: &ChunkRequest<'_>) -> Result<ChunkResult> {
    let range = req.range;
    let resp = client
        .get(req.url.clone())
        .header(RANGE, range.header_value())
        .send()
        .await?;

    let status = resp.status();
    let whole_file = range.start == 0 && range.len() == req.total_size;
    match status {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK if whole_file => {}
        StatusCode::OK => {
            return Err(SyncError::RangeNotSupported {
                url: req.url.to_string(),
            });
        }
        other => {
            return Err(SyncError::HttpStatus {
                status: other,
                url: req.url.to_string(),
            });
        }
    }

    let header_checksum = resp
        .headers()
        .get(CHUNK_CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());

    let expected_len = range.len();
    let mut buf = BytesMut::with_capacity(expected_len as usize);
    let mut stream = resp.bytes_stream();
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        if (buf.len() + piece.len()) as u64 > expected_len {
            return Err(SyncError::BodyLength {
                chunk_index: range.index,
                expected: expected_len,
                actual: (buf.len() + piece.len()) as u64,
            });
        }
        buf.extend_from_slice(&piece);
    }
    if buf.len() as u64 != expected_len {
        return Err(SyncError::BodyLength {
            chunk_index: range.index,
            expected: expected_len,
            actual: buf.len() as u64,
        });
    }

    let bytes = buf.freeze();
    let checksum = IntegrityVerifier::chunk_checksum(&bytes);
    let expected = req.expected_checksum.or(header_checksum.as_deref());
    IntegrityVerifier::verify_chunk(range.index, &checksum, expected)?;

    Ok(ChunkResult {
        range,
        bytes,
        checksum,
    })
}
