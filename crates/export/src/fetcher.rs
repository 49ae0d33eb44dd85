use async_trait::async_trait;
use d1_backup_types::{DumpStream, SignedUrl};
use futures::TryStreamExt;
use reqwest::Client;
use std::io;
use std::time::Duration;
use tracing::debug;

use crate::{clip_body, ExportError, Result};

/// Source of finished dumps.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Open the dump behind `url` as a stream. The body is not buffered.
    async fn fetch(&self, url: &SignedUrl) -> Result<DumpStream>;
}

/// Downloads dumps over plain HTTP GET.
///
/// Signed URLs are pre-authorized, so no API credentials are attached.
pub struct DumpFetcher {
    client: Client,
}

impl DumpFetcher {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        // No overall timeout: a large dump may legitimately take a long time to transfer.
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ExportError::NetworkError(format!("HTTP client error: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DumpSource for DumpFetcher {
    async fn fetch(&self, url: &SignedUrl) -> Result<DumpStream> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::TransportError {
                status: status.as_u16(),
                body: clip_body(body),
            });
        }

        let content_length = response.content_length();
        debug!(?content_length, "Dump download started");

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(DumpStream::new(body, content_length))
    }
}
