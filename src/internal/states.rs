pub(crate) mod reactive_core;
pub mod lock_reactive;
pub mod queue_reactive;
pub mod unlock_reactive;
