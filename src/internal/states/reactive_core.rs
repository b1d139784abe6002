//! # ReactiveProperty — 响应式属性内核
//!
//! 基于 `tokio::sync::watch`：写入不阻塞，读取拿到最新快照，监听者只关心最新值。
//! 引擎用它对外发布歌单同步快照，见 [`UnlockReactiveProperty`](super::unlock_reactive::UnlockReactiveProperty)。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::sync::watch::error::RecvError;

/// 响应式属性统一错误类型
#[derive(Debug, Error)]
pub enum ReactivePropertyError {
    #[error("监听器已被销毁")]
    WatcherClosed,

    #[error("属性已被销毁")]
    Destroyed,

    #[error("接收失败: {0}")]
    RecvError(#[from] RecvError),
}

/// 响应式属性内核：new / update / update_field / get_current / watch / destroy。
///
/// 值为 `None` 表示属性已销毁，之后的写入返回 [`ReactivePropertyError::Destroyed`]。
#[derive(Clone, Debug)]
pub struct ReactiveProperty<T: Clone + Send + Sync> {
    sender: Arc<watch::Sender<Option<T>>>,
}

impl<T> ReactiveProperty<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(value: T) -> Self {
        let (sender, _) = watch::channel(Some(value));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// 整体替换当前值，没有监听者时同样生效。
    pub fn update(&self, new_value: T) -> Result<&Self, ReactivePropertyError> {
        self.update_field(|v| *v = new_value)?;
        Ok(self)
    }

    /// 原地修改部分字段；修改与发布在同一次 `send_if_modified` 内完成，不会丢失并发更新。
    pub fn update_field<F, R>(&self, updater: F) -> Result<R, ReactivePropertyError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut updater = Some(updater);
        let mut out = None;
        self.sender.send_if_modified(|slot| match slot.as_mut() {
            Some(value) => {
                if let Some(f) = updater.take() {
                    out = Some(f(value));
                }
                true
            }
            None => false,
        });
        out.ok_or(ReactivePropertyError::Destroyed)
    }

    /// 销毁属性，所有监听者的 `changed()` 返回 [`ReactivePropertyError::WatcherClosed`]。
    pub fn destroy(&self) {
        self.sender.send_replace(None);
    }

    /// 当前值的快照（clone）。
    pub fn get_current(&self) -> Option<T> {
        self.sender.borrow().as_ref().cloned()
    }

    /// 创建监听器；监听器只会看到创建之后的变化。
    pub fn watch(&self) -> PropertyWatcher<T> {
        PropertyWatcher {
            receiver: self.sender.subscribe(),
        }
    }
}

/// 属性监听器。
pub struct PropertyWatcher<T> {
    receiver: watch::Receiver<Option<T>>,
}

impl<T> PropertyWatcher<T>
where
    T: Clone + Send + Sync,
{
    /// 等待下一次变化并返回新值。
    pub async fn changed(&mut self) -> Result<T, ReactivePropertyError> {
        self.receiver.changed().await?;
        match self.receiver.borrow_and_update().as_ref() {
            None => Err(ReactivePropertyError::WatcherClosed),
            Some(value) => Ok(value.clone()),
        }
    }

    /// 等待直到值满足条件，当前值已满足时立即返回。
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<T, ReactivePropertyError>
    where
        F: FnMut(&T) -> bool,
    {
        let value = self
            .receiver
            .wait_for(|slot| match slot {
                Some(v) => predicate(v),
                None => true,
            })
            .await?;
        let current: Option<T> = (*value).clone();
        current.ok_or(ReactivePropertyError::WatcherClosed)
    }
}
