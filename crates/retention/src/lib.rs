pub mod pruner;
pub mod timestamp;

pub use pruner::{DeleteFailure, RetentionPruner, RetentionWindow, SweepReport};
pub use timestamp::{extract_uploaded_at, TextFormat, TimestampField};

use d1_backup_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Listing archive failed: {0}")]
    ListFailed(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, RetentionError>;
