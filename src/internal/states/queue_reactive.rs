//! # QueueReactiveProperty — 事件队列
//!
//! 基于 `mpsc::unbounded_channel` 的单向队列：生产者可 Clone，消费者唯一，严格 FIFO。
//! 同时维护一个“最近一条”的响应式属性，便于只关心最新事件的订阅者。
//!
//! 引擎的进度事件通道即由它承载：每个分片完成、每次状态迁移各推送一条。

use tokio::sync::mpsc;

use super::reactive_core::{PropertyWatcher, ReactiveProperty};

/// 生产者端。
#[derive(Clone, Debug)]
pub struct QueueReactiveProperty<T: Clone + Send + Sync + 'static> {
    sender: mpsc::UnboundedSender<T>,
    latest: ReactiveProperty<Option<T>>,
}

/// 消费者端，不可 Clone。
#[derive(Debug)]
pub struct QueueReactiveConsumer<T: Clone + Send + Sync + 'static> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> QueueReactiveProperty<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 返回 (生产者, 消费者)。
    pub fn new() -> (Self, QueueReactiveConsumer<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let producer = Self {
            sender,
            latest: ReactiveProperty::new(None),
        };
        (producer, QueueReactiveConsumer { receiver })
    }

    /// 推送一条消息；消费者已关闭时返回 `Err(T)`，最近值照常更新。
    pub fn send(&self, value: T) -> Result<(), T> {
        let _ = self.latest.update(Some(value.clone()));
        self.sender.send(value).map_err(|e| e.0)
    }

    /// 最近一条消息。
    pub fn latest(&self) -> Option<T> {
        self.latest.get_current().flatten()
    }

    pub fn watch(&self) -> PropertyWatcher<Option<T>> {
        self.latest.watch()
    }

    /// 消费者是否已被丢弃。
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> QueueReactiveConsumer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 等待下一条消息；所有生产者都被丢弃后返回 `None`。
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// 非阻塞读取，队列为空时返回 `None`。
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// 取出当前已排队的全部消息。
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(v) = self.receiver.try_recv() {
            out.push(v);
        }
        out
    }
}
