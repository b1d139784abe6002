pub mod control_command;
pub mod outcomes;
pub mod playlist_ref;
pub mod playlist_sync_job;
pub mod progress_event;
pub mod song_ref;
pub mod sync_snapshot;

pub use control_command::{ControlCommand, RunState};
pub use outcomes::{PlaylistOutcome, PlaylistStatus, SongOutcome, SongResult};
pub use playlist_ref::PlaylistRef;
pub use playlist_sync_job::PlaylistSyncJob;
pub use progress_event::ProgressEvent;
pub use song_ref::SongRef;
pub use sync_snapshot::{PlaylistSnapshot, SyncSnapshot};
