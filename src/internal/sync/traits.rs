pub mod playlist_source;
pub mod staging_sink_factory;

pub use playlist_source::{HttpPlaylistSource, PlaylistSource};
pub use staging_sink_factory::StagingSinkFactory;
