//! 并发闸门：限制同时处于下载中的歌曲数。
//!
//! 闸门本身不排队，`try_acquire` 满员时立即返回 `None`；
//! 排队由调用方完成，借助 [`BandwidthGate::released`] 在有名额释放时被唤醒。

use std::sync::Arc;

use tokio::sync::futures::Notified;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct BandwidthGate {
    semaphore: Arc<Semaphore>,
    released: Arc<Notify>,
    capacity: usize,
}

/// 闸门名额。丢弃即归还，覆盖成功、失败、取消、panic 展开等所有退出路径。
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

impl BandwidthGate {
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            released: Arc::new(Notify::new()),
            capacity,
        }
    }

    /// 尝试占用一个名额，满员时立即返回 `None`。
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(GatePermit {
            permit: Some(permit),
            released: Arc::clone(&self.released),
        })
    }

    /// 名额释放通知。调用方应先 `enable` 再 `try_acquire`，避免错过两者之间的释放。
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
