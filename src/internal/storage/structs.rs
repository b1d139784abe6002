pub mod download_state;
pub mod download_status;
pub mod temp_file_handle;

pub use download_state::DownloadState;
pub use download_status::DownloadStatus;
pub use temp_file_handle::TempFileHandle;
