pub mod batch_sync_manager;
pub mod song_coordinator;
pub mod structs;
pub mod sync_context;
pub mod sync_controller;
pub mod sync_engine;
pub mod traits;
