//! 暂存文件管理：下载写入 `<目标路径>.temp`，完成后 rename 为最终文件；
//! 长时间无写入的暂存文件由后台清扫删除。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::storage::structs::TempFileHandle;

/// 暂存文件后缀
pub const TEMP_SUFFIX: &str = "temp";

#[derive(Debug, Clone)]
pub struct TempFileManager {
    ttl: chrono::Duration,
    handles: Arc<StdMutex<HashMap<PathBuf, TempFileHandle>>>,
}

impl TempFileManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            handles: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// 最终路径对应的暂存路径。
    pub fn staging_path_for(final_path: &Path) -> PathBuf {
        let mut name = final_path.as_os_str().to_os_string();
        name.push(".");
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    /// 登记并创建暂存文件（已存在则保留内容，用于续传）。
    pub async fn stage(&self, song_id: &str, final_path: &Path) -> Result<TempFileHandle> {
        let staging_path = Self::staging_path_for(final_path);
        if let Some(parent) = staging_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&staging_path)
            .await
            .map_err(|e| SyncError::io(&staging_path, e))?;

        let now = Utc::now();
        let mut handles = self.lock_handles();
        let handle = handles
            .entry(staging_path.clone())
            .and_modify(|h| {
                h.song_id = song_id.to_string();
                h.last_accessed = now;
            })
            .or_insert_with(|| TempFileHandle {
                song_id: song_id.to_string(),
                staging_path,
                created_at: now,
                last_accessed: now,
            });
        Ok(handle.clone())
    }

    /// 刷新最近访问时间，活跃下载不会被清扫。
    pub fn touch(&self, staging_path: &Path) {
        self.touch_at(staging_path, Utc::now());
    }

    pub fn touch_at(&self, staging_path: &Path, when: DateTime<Utc>) {
        if let Some(h) = self.lock_handles().get_mut(staging_path) {
            h.last_accessed = when;
        }
    }

    pub fn handle(&self, staging_path: &Path) -> Option<TempFileHandle> {
        self.lock_handles().get(staging_path).cloned()
    }

    pub fn tracked(&self) -> usize {
        self.lock_handles().len()
    }

    /// 原子地把暂存文件 rename 为最终文件，并移除登记。
    pub async fn promote(&self, staging_path: &Path, final_path: &Path) -> Result<()> {
        tokio::fs::rename(staging_path, final_path)
            .await
            .map_err(|e| SyncError::io(final_path, e))?;
        self.lock_handles().remove(staging_path);
        tracing::debug!(path = %final_path.display(), "暂存文件已转正");
        Ok(())
    }

    /// 删除暂存文件并移除登记，文件不存在不算错误。
    pub async fn discard(&self, staging_path: &Path) -> Result<()> {
        self.lock_handles().remove(staging_path);
        remove_if_exists(staging_path).await
    }

    pub async fn sweep(&self) -> Vec<PathBuf> {
        self.sweep_at(Utc::now()).await
    }

    /// 删除 `now - last_accessed > ttl` 的暂存文件，返回被删除的路径。
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<PathBuf> {
        let expired: Vec<(PathBuf, DateTime<Utc>)> = self
            .lock_handles()
            .values()
            .filter(|h| now - h.last_accessed > self.ttl)
            .map(|h| (h.staging_path.clone(), h.last_accessed))
            .collect();

        let mut removed = Vec::new();
        for (path, seen) in expired {
            // 删除前再确认一次，期间被 touch 的文件保留
            let still_stale = {
                let mut handles = self.lock_handles();
                match handles.get(&path) {
                    Some(h) if h.last_accessed == seen => {
                        handles.remove(&path);
                        true
                    }
                    _ => false,
                }
            };
            if !still_stale {
                continue;
            }
            match remove_if_exists(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "已清理孤儿暂存文件");
                    removed.push(path);
                }
                Err(e) => tracing::warn!(error = %e, "清理孤儿暂存文件失败"),
            }
        }
        removed
    }

    /// 登记目录下遗留的 `*.temp` 文件，以修改时间作为最近访问时间。
    pub async fn adopt_orphans(&self, dir: &Path) -> Result<usize> {
        let mut adopted = 0;
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SyncError::io(&current, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SyncError::io(&current, e))?
            {
                let path = entry.path();
                let meta = entry.metadata().await.map_err(|e| SyncError::io(&path, e))?;
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(TEMP_SUFFIX) {
                    continue;
                }
                let modified: DateTime<Utc> = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let song_id = song_id_from_staging(&path);
                let inserted = {
                    let mut handles = self.lock_handles();
                    if handles.contains_key(&path) {
                        false
                    } else {
                        handles.insert(
                            path.clone(),
                            TempFileHandle {
                                song_id,
                                staging_path: path,
                                created_at: modified,
                                last_accessed: modified,
                            },
                        );
                        true
                    }
                };
                if inserted {
                    adopted += 1;
                }
            }
        }
        if adopted > 0 {
            tracing::info!(dir = %dir.display(), adopted, "已登记遗留暂存文件");
        }
        Ok(adopted)
    }

    /// 启动后台清扫任务，`cancel` 触发后退出。
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.sweep().await;
                        tracing::debug!(removed = removed.len(), "孤儿暂存文件清扫完成");
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, TempFileHandle>> {
        match self.handles.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// `<song_id>.mp3.temp` → `song_id`
fn song_id_from_staging(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let without_temp = name.strip_suffix(".temp").unwrap_or(name);
    match without_temp.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => without_temp.to_string(),
    }
}
