pub mod error_class;
pub mod sync_error;
