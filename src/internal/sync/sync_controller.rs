//! 暂停 / 恢复 / 取消控制。
//!
//! 暂停只在分片边界生效：已在传输中的分片继续完成，新的分片在恢复前不会派发。
//! 取消即引擎级取消令牌，所有歌单令牌都是它的子令牌。

use tokio_util::sync::CancellationToken;

use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::states::lock_reactive::LockReactiveProperty;
use crate::internal::sync::structs::{ControlCommand, RunState};

#[derive(Debug, Clone)]
pub struct SyncController {
    run_state: LockReactiveProperty<RunState>,
    cancel: CancellationToken,
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncController {
    pub fn new() -> Self {
        Self {
            run_state: LockReactiveProperty::new(RunState::Running),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn pause(&self) {
        if self.run_state.replace_if_changed(RunState::Paused).await {
            tracing::info!("同步已暂停");
        }
    }

    pub async fn resume(&self) {
        if self.run_state.replace_if_changed(RunState::Running).await {
            tracing::info!("同步已恢复");
        }
    }

    /// 取消全部同步。已取消的引擎不能再恢复。
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("同步已取消");
        }
        self.cancel.cancel();
    }

    pub async fn apply(&self, command: ControlCommand) {
        match command {
            ControlCommand::Pause => self.pause().await,
            ControlCommand::Resume => self.resume().await,
            ControlCommand::Cancel => self.cancel(),
        }
    }

    pub async fn run_state(&self) -> RunState {
        self.run_state.get_current().await
    }

    pub async fn is_paused(&self) -> bool {
        !self.run_state().await.is_running()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 挂起直到处于运行状态；`cancel` 触发时返回 `Cancelled`。
    pub async fn wait_running(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = self.run_state.wait_until(|s| s.is_running()) => Ok(()),
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
        }
    }
}
