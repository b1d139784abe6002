//! 文件大小查询。

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use url::Url;

use crate::internal::errors::sync_error::{Result, SyncError};

/// HEAD 请求读取 `Content-Length`。服务端不支持 HEAD 或未给出长度时返回 `None`。
///
/// 直接读响应头：HEAD 响应没有正文，`Response::content_length()` 在这里不可靠。
pub(super) async fn head_length(client: &reqwest::Client, url: &Url) -> Result<Option<u64>> {
    let resp = client.head(url.clone()).send().await?;
    let status = resp.status();
    if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(SyncError::HttpStatus {
            status,
            url: url.to_string(),
        });
    }
    Ok(header_u64(resp.headers(), CONTENT_LENGTH.as_str()).filter(|n| *n > 0))
}

/// `Range: bytes=0-0` 请求，从 `Content-Range: bytes 0-0/<total>` 中取总长度。
pub(super) async fn content_range_length(client: &reqwest::Client, url: &Url) -> Result<u64> {
    let resp = client.get(url.clone()).header(RANGE, "bytes=0-0").send().await?;
    let status = resp.status();
    let total = match status {
        StatusCode::PARTIAL_CONTENT => resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total),
        StatusCode::OK => header_u64(resp.headers(), CONTENT_LENGTH.as_str()),
        other => {
            return Err(SyncError::HttpStatus {
                status: other,
                url: url.to_string(),
            });
        }
    };
    total.filter(|n| *n > 0).ok_or_else(|| SyncError::UnknownContentLength {
        url: url.to_string(),
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// 解析 `bytes 0-0/1234`；总长度为 `*` 时返回 `None`。
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
