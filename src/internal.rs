pub mod chunking;
pub mod config;
pub mod errors;
pub mod integrity;
pub mod logging;
pub mod states;
pub mod storage;
pub mod sync;
pub mod throttle;
pub mod transfer;
