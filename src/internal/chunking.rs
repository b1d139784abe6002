pub mod chunk_planner;
pub mod ordering_buffer;
pub mod structs;
pub mod traits;
