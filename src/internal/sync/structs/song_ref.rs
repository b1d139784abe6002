use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::internal::errors::sync_error::Result;

const DEFAULT_EXTENSION: &str = "mp3";

/// 元数据接口给出的歌曲信息，字段名与接口 JSON 保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 相对 `baseUrl` 的路径，可能含有 Windows 风格的反斜杠
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// 整文件 SHA-256
    #[serde(default)]
    pub checksum: Option<String>,
    /// 逐分片 SHA-256，序号与分片方案一致
    #[serde(default, rename = "chunkChecksums")]
    pub chunk_checksums: Option<Vec<String>>,
}

impl SongRef {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            file_path: file_path.into(),
            size: None,
            checksum: None,
            chunk_checksums: None,
        }
    }

    /// `baseUrl` 拼接 `filePath`，反斜杠统一为 `/`。
    pub fn download_url(&self, base_url: &Url) -> Result<Url> {
        let normalized = self.file_path.replace('\\', "/");
        let relative = normalized.trim_start_matches('/');
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(relative)?)
    }

    /// 文件扩展名，取自 `filePath`，缺省为 `mp3`。
    pub fn extension(&self) -> &str {
        let normalized = self.file_path.rsplit(['/', '\\']).next().unwrap_or_default();
        match normalized.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
            _ => DEFAULT_EXTENSION,
        }
    }

    /// `<media_root>/<playlist_id>/<song_id>.<ext>`
    pub fn final_path(&self, media_root: &Path, playlist_id: &str) -> PathBuf {
        media_root
            .join(playlist_id)
            .join(format!("{}.{}", self.id, self.extension()))
    }

    pub fn expected_chunk_checksum(&self, index: usize) -> Option<&str> {
        self.chunk_checksums
            .as_ref()
            .and_then(|all| all.get(index))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
