use thiserror::Error;

pub mod fs;
pub mod key;
pub mod memory;
pub mod traits;

pub use fs::*;
pub use key::*;
pub use memory::*;
pub use traits::*;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload of {key} failed: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("Listing objects failed: {0}")]
    ListFailed(String),

    #[error("Delete of {key} failed: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Rejects keys that could escape the bucket or collide with in-flight uploads.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
