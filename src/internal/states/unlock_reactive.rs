//! # UnlockReactiveProperty
//!
//! 读写不阻塞的响应式属性，适合高频更新的场景，例如歌单同步进度快照。
//!
//! ```rust,no_run
//! use playlist_sync::states::unlock_reactive::UnlockReactiveProperty;
//!
//! let completed = UnlockReactiveProperty::new(0usize);
//! completed.update(1).unwrap();
//! completed.update_field(|n| *n += 1).unwrap();
//! ```

pub use super::reactive_core::{PropertyWatcher, ReactivePropertyError as UnlockReactivePropertyError};

/// 轻量级响应式属性容器（无条件等待能力）。
///
/// 需要“等到某个状态再继续”的场景（暂停 / 恢复）请用
/// [`LockReactiveProperty`](super::lock_reactive::LockReactiveProperty)。
pub type UnlockReactiveProperty<T> = super::reactive_core::ReactiveProperty<T>;
