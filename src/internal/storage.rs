pub mod download_state_store;
pub mod structs;
pub mod temp_file_manager;
