//! # LockReactiveProperty
//!
//! 带条件等待能力的响应式属性，基于 `tokio::sync::Mutex` + `Notify`。
//!
//! 与 [`UnlockReactiveProperty`](super::unlock_reactive::UnlockReactiveProperty) 不同，
//! `wait_until` 不会错过任何满足条件的时刻，适合暂停 / 恢复这类控制信号：
//! 分片任务在派发前 `wait_until(|s| s.is_running())`，暂停期间挂起，恢复后继续。
//!
//! ```rust,no_run
//! use playlist_sync::states::lock_reactive::LockReactiveProperty;
//!
//! # async fn example() {
//! let gate = LockReactiveProperty::new(false);
//! let g = gate.clone();
//! tokio::spawn(async move {
//!     g.update(true).await;
//! });
//! gate.wait_until(|open| *open).await;
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct Inner<T> {
    value: Mutex<T>,
    notify: Notify,
}

/// 带条件等待能力的响应式属性容器。
#[derive(Clone)]
pub struct LockReactiveProperty<T: Clone + Send + Sync> {
    inner: Arc<Inner<T>>,
}

impl<T> std::fmt::Debug for LockReactiveProperty<T>
where
    T: Clone + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockReactiveProperty").finish_non_exhaustive()
    }
}

impl<T> LockReactiveProperty<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                notify: Notify::new(),
            }),
        }
    }

    /// 更新值并唤醒所有等待者。
    pub async fn update(&self, new_value: T) {
        *self.inner.value.lock().await = new_value;
        self.inner.notify.notify_waiters();
    }

    /// 仅当新值与旧值不同时写入，返回是否发生了变化。
    pub async fn replace_if_changed(&self, new_value: T) -> bool
    where
        T: PartialEq,
    {
        let mut guard = self.inner.value.lock().await;
        if *guard == new_value {
            return false;
        }
        *guard = new_value;
        drop(guard);
        self.inner.notify.notify_waiters();
        true
    }

    pub async fn get_current(&self) -> T {
        self.inner.value.lock().await.clone()
    }

    /// 挂起直到值满足 `predicate`，当前值已满足时立即返回。
    ///
    /// 先登记 `Notified` 再检查条件，检查与等待之间的更新不会丢失。
    pub async fn wait_until<F>(&self, mut predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if predicate(&*self.inner.value.lock().await) {
                return;
            }
            notified.await;
        }
    }
}
