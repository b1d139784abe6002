pub mod chunk_transfer;
pub mod retry_policy;
