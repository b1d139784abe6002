//! 单分片传输测试（wiremock 模拟源站）
//!
//! 测试项：
//! - Range 请求取回正确的字节与摘要
//! - Range 请求不申请压缩编码，字节数与偏移按原文件计算
//! - 瞬时错误自动重试
//! - 响应头摘要不一致时重试，耗尽后报告 ChunkFailed
//! - 服务端忽略 Range 时立即失败
//! - 超时与大小查询

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::chunking::ChunkPlanner;
use crate::errors::{ErrorClass, SyncError};
use crate::tests::{RangeResponder, count_requests, mount_file, payload, sha256_hex};
use crate::throttle::ThrottleController;
use crate::transfer::{Backoff, CHUNK_CHECKSUM_HEADER, ChunkRequest, ChunkTransfer, RetryPolicy};

const SIZE: usize = 4 * 262_144 + 1000;

fn transfer(max_retries: u32, timeout: Duration) -> ChunkTransfer {
    ChunkTransfer::new(
        reqwest::Client::new(),
        Arc::new(ThrottleController::unlimited()),
        RetryPolicy::for_chunks(
            max_retries,
            Backoff {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                jitter: Duration::ZERO,
            },
        ),
        timeout,
    )
}

fn song_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/media/a.mp3", server.uri())).unwrap()
}

// ═══════════════════════════ 正常传输 ═══════════════════════════

#[tokio::test]
async fn fetches_requested_range() {
    let server = MockServer::start().await;
    let body = payload(SIZE);
    mount_file(&server, "a.mp3", body.clone()).await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let chunk = transfer(0, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[1],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap();

    let expected = &body[plan[1].start as usize..=plan[1].end as usize];
    assert_eq!(chunk.index(), 1);
    assert_eq!(chunk.bytes.as_ref(), expected);
    assert_eq!(chunk.checksum, sha256_hex(expected));
}

#[tokio::test]
async fn range_requests_ask_for_identity_bytes() {
    let server = MockServer::start().await;
    let body = payload(SIZE);
    mount_file(&server, "a.mp3", body).await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    transfer(0, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[0],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let encoding = requests[0]
        .headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(!encoding.contains("gzip"), "accept-encoding: {encoding}");
}

#[tokio::test]
async fn transient_status_is_retried() {
    let server = MockServer::start().await;
    let body = payload(SIZE);
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_file(&server, "a.mp3", body).await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let chunk = transfer(3, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[0],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap();

    assert_eq!(chunk.index(), 0);
    assert_eq!(count_requests(&server, "GET").await, 2);
}

// ═══════════════════════════ 分片校验 ═══════════════════════════

#[tokio::test]
async fn header_checksum_mismatch_exhausts_retries() {
    let server = MockServer::start().await;
    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let range = plan[2];
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header(CHUNK_CHECKSUM_HEADER, "deadbeef")
                .set_body_bytes(vec![0u8; range.len() as usize]),
        )
        .mount(&server)
        .await;

    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let err = transfer(2, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range,
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ChunkFailed { chunk_index: 2, retries: 2, .. }));
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(count_requests(&server, "GET").await, 3);
}

#[tokio::test]
async fn metadata_checksum_takes_priority_over_header() {
    let server = MockServer::start().await;
    let body = payload(SIZE);
    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let range = plan[0];
    let slice = body[..range.len() as usize].to_vec();
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header(CHUNK_CHECKSUM_HEADER, "deadbeef")
                .set_body_bytes(slice.clone()),
        )
        .mount(&server)
        .await;

    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let expected = sha256_hex(&slice);
    let chunk = transfer(0, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range,
            total_size: SIZE as u64,
            expected_checksum: Some(&expected),
            cancel: &cancel,
        })
        .await
        .unwrap();
    assert_eq!(chunk.checksum, expected);
}

// ═══════════════════════════ 协议错误 ═══════════════════════════

#[tokio::test]
async fn ignored_range_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(SIZE)))
        .mount(&server)
        .await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let err = transfer(3, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[1],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RangeNotSupported { .. }));
    assert_eq!(count_requests(&server, "GET").await, 1);
}

#[tokio::test]
async fn whole_file_response_accepted_for_single_chunk() {
    let server = MockServer::start().await;
    let body = payload(1000);
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let plan = ChunkPlanner::plan(1000).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let chunk = transfer(0, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[0],
            total_size: 1000,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap();
    assert_eq!(chunk.bytes.as_ref(), body.as_slice());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .respond_with(RangeResponder::new(payload(SIZE)).with_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let err = transfer(0, Duration::from_millis(50))
        .download(ChunkRequest {
            url: &url,
            range: plan[0],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ChunkFailed { chunk_index: 0, retries: 0, .. }));
}

#[tokio::test]
async fn cancelled_request_reports_cancelled() {
    let server = MockServer::start().await;
    mount_file(&server, "a.mp3", payload(SIZE)).await;

    let plan = ChunkPlanner::plan(SIZE as i64).unwrap();
    let url = song_url(&server);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = transfer(3, Duration::from_secs(5))
        .download(ChunkRequest {
            url: &url,
            range: plan[0],
            total_size: SIZE as u64,
            expected_checksum: None,
            cancel: &cancel,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
}

// ═══════════════════════════ 大小查询 ═══════════════════════════

#[tokio::test]
async fn size_falls_back_to_metadata_size() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let url = song_url(&server);
    let size = transfer(0, Duration::from_secs(5))
        .resolve_size(&url, Some(1234), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(size, 1234);
    assert_eq!(count_requests(&server, "GET").await, 0);
}

#[tokio::test]
async fn size_uses_content_range_without_head_or_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/a.mp3"))
        .and(header("range", "bytes=0-0"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", format!("bytes 0-0/{SIZE}").as_str())
                .set_body_bytes(vec![0u8]),
        )
        .mount(&server)
        .await;

    let url = song_url(&server);
    let size = transfer(0, Duration::from_secs(5))
        .resolve_size(&url, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(size, SIZE as u64);
}

#[tokio::test]
async fn size_reports_missing_file() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = song_url(&server);
    let err = transfer(3, Duration::from_secs(5))
        .resolve_size(&url, Some(10), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus { status, .. } if status.as_u16() == 404));
    assert_eq!(count_requests(&server, "HEAD").await, 1);
}

#[tokio::test]
async fn stalled_head_is_interrupted_by_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(8)))
        .mount(&server)
        .await;

    let url = song_url(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = transfer(3, Duration::from_secs(30))
        .resolve_size(&url, Some(10), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2), "取消应打断挂起的 HEAD");
}

#[tokio::test]
async fn stalled_head_times_out_and_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(8)))
        .mount(&server)
        .await;

    let url = song_url(&server);
    let started = std::time::Instant::now();
    let err = transfer(1, Duration::from_millis(100))
        .resolve_size(&url, Some(10), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SizeCheckTimeout { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(count_requests(&server, "HEAD").await, 2);
}
