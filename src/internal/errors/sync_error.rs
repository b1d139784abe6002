use std::io::ErrorKind;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use super::error_class::ErrorClass;

pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步引擎统一错误类型。
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP 传输层错误（连接重置、拒绝、DNS 等）
    #[error("HTTP 请求失败: {0}")]
    Request(#[from] reqwest::Error),

    /// 单个分片超时
    #[error("分片 {chunk_index} 下载超时")]
    Timeout { chunk_index: usize },

    /// 大小查询请求超时
    #[error("查询文件大小超时: {url}")]
    SizeCheckTimeout { url: String },

    /// 服务端返回非预期状态码
    #[error("HTTP 状态码异常: {status} ({url})")]
    HttpStatus { status: StatusCode, url: String },

    /// 收到的字节数与请求范围不一致
    #[error("分片 {chunk_index} 数据长度不符: 期望 {expected} 字节，实际 {actual} 字节")]
    BodyLength {
        chunk_index: usize,
        expected: u64,
        actual: u64,
    },

    /// 服务端不支持 Range 请求
    #[error("服务端不支持 Range 请求: {url}")]
    RangeNotSupported { url: String },

    /// 无法确定远程文件大小
    #[error("无法获取文件大小: {url}")]
    UnknownContentLength { url: String },

    /// 分片校验和不匹配
    #[error("分片 {chunk_index} 校验失败: 期望 {expected}，实际 {actual}")]
    ChunkChecksumMismatch {
        chunk_index: usize,
        expected: String,
        actual: String,
    },

    /// 整文件校验失败（大小或摘要）
    #[error("文件校验失败: {song_id}, 期望 {expected}，实际 {actual}")]
    FileChecksumMismatch {
        song_id: String,
        expected: String,
        actual: String,
    },

    /// 分片重试耗尽
    #[error("分片 {chunk_index} 重试 {retries} 次后仍失败: {message}")]
    ChunkFailed {
        chunk_index: usize,
        retries: u32,
        message: String,
    },

    /// 本地磁盘读写失败
    #[error("文件操作失败: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 状态文件序列化 / 反序列化失败
    #[error("状态文件序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 配置非法
    #[error("配置错误: {0}")]
    Config(String),

    /// 下载地址非法
    #[error("下载地址非法: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 文件大小为 0 或负数，无法分片
    #[error("文件大小非法，无法分片: {file_size}")]
    EmptyPlan { file_size: i64 },

    /// 分片序号越界
    #[error("分片序号越界: {index} (共 {total} 片)")]
    InvalidChunkIndex { index: usize, total: usize },

    /// 状态记录缺失或状态迁移非法
    #[error("状态非法: {0}")]
    InvalidState(String),

    /// 子任务 panic 或被中止
    #[error("任务执行失败: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// 已取消
    #[error("已取消")]
    Cancelled,
}

impl SyncError {
    /// 包装一个带路径的 I/O 错误。
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// 按错误分类划分：决定是否重试、在哪一层恢复。
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Request(e) => classify_reqwest(e),
            SyncError::Timeout { .. }
            | SyncError::SizeCheckTimeout { .. }
            | SyncError::BodyLength { .. } => ErrorClass::Transient,
            SyncError::HttpStatus { status, .. } => classify_status(*status),
            SyncError::ChunkChecksumMismatch { .. } | SyncError::FileChecksumMismatch { .. } => {
                ErrorClass::Integrity
            }
            SyncError::Io { source, .. } => classify_io(source),
            SyncError::Cancelled => ErrorClass::Cancelled,
            SyncError::ChunkFailed { .. }
            | SyncError::RangeNotSupported { .. }
            | SyncError::UnknownContentLength { .. }
            | SyncError::Serialize(_)
            | SyncError::Config(_)
            | SyncError::InvalidUrl(_)
            | SyncError::EmptyPlan { .. }
            | SyncError::InvalidChunkIndex { .. }
            | SyncError::InvalidState(_)
            | SyncError::TaskJoin(_) => ErrorClass::Fatal,
        }
    }
}

/// 408/429/5xx 中的网关类错误视为瞬时错误，其余状态码不重试。
pub(crate) fn classify_status(status: StatusCode) -> ErrorClass {
    match status.as_u16() {
        408 | 429 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

fn classify_reqwest(e: &reqwest::Error) -> ErrorClass {
    if let Some(status) = e.status() {
        return classify_status(status);
    }
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        return ErrorClass::Transient;
    }
    ErrorClass::Fatal
}

fn classify_io(e: &std::io::Error) -> ErrorClass {
    match e.kind() {
        ErrorKind::StorageFull
        | ErrorKind::PermissionDenied
        | ErrorKind::ReadOnlyFilesystem => ErrorClass::Resource,
        ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionAborted
        | ErrorKind::Interrupted => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}
