pub mod stream;
pub mod target;
pub mod token;

pub use stream::DumpStream;
pub use target::DatabaseTarget;
pub use token::{Bookmark, SignedUrl};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Empty bookmark")]
    EmptyBookmark,

    #[error("Empty signed URL")]
    EmptySignedUrl,
}

pub type Result<T> = std::result::Result<T, TypesError>;
