pub mod client;
pub mod fetcher;
pub mod poller;

pub use client::{ClientConfig, ExportApi, ExportClient, ExportRequest, ExportStatus, POLLING_FORMAT};
pub use fetcher::{DumpFetcher, DumpSource};
pub use poller::{BookmarkPoller, PollerConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    /// The service answered with a shape we cannot interpret.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transport error: HTTP {status}: {body}")]
    TransportError { status: u16, body: String },

    #[error("Export did not complete after {attempts} polls")]
    ExportTimeout { attempts: u32 },

    /// The service reported the export itself as failed.
    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;

const MAX_ERROR_BODY: usize = 2048;

/// Clip a response body for inclusion in an error message.
pub(crate) fn clip_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
