use serde::{Deserialize, Serialize};

/// 单首歌曲的下载状态。
///
/// `Pending → Downloading → {Completed | Error}`，闸门满员时可能 `Downloading → Paused → Downloading`。
/// `Error` 为终态，只能显式重新初始化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Error,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Error)
    }
}
