pub mod chunk_range;
pub mod chunk_result;

pub use chunk_range::ChunkRange;
pub use chunk_result::ChunkResult;
