//! 错误分类：决定一个错误在哪一层被恢复、是否需要重试、是否需要全局告警。

use serde::{Deserialize, Serialize};

/// 错误分类。
///
/// - `Transient`：网络瞬时故障，分片级重试。
/// - `Fatal`：不可恢复（如 404、请求非法），直接上抛。
/// - `Integrity`：校验和不匹配，按分片或整文件有限次重试。
/// - `Resource`：磁盘满、权限不足，立即上抛并波及整个歌单。
/// - `Cancelled`：取消，不视为错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Fatal,
    Integrity,
    Resource,
    Cancelled,
}

impl ErrorClass {
    /// 是否为取消（正常终态，而不是失败）。
    pub fn is_cancelled(self) -> bool {
        matches!(self, ErrorClass::Cancelled)
    }
}
