use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// 一个暂存文件的登记信息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFileHandle {
    pub song_id: String,
    pub staging_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}
