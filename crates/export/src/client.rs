use async_trait::async_trait;
use d1_backup_types::{Bookmark, DatabaseTarget, SignedUrl};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::{clip_body, ExportError, Result};

/// Output format that makes the export endpoint hand back a bookmark.
pub const POLLING_FORMAT: &str = "polling";

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Export endpoint of the database service.
#[async_trait]
pub trait ExportApi: Send + Sync {
    /// Kick off an export and return the bookmark identifying it.
    async fn start(&self, target: &DatabaseTarget) -> Result<Bookmark>;

    /// Ask how the export identified by `bookmark` is doing.
    async fn poll(&self, target: &DatabaseTarget, bookmark: &Bookmark) -> Result<ExportStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Active,
    Complete { signed_url: SignedUrl },
}

/// One call against the export endpoint.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub target: DatabaseTarget,
    pub output_format: String,
    pub current_bookmark: Option<Bookmark>,
}

impl ExportRequest {
    pub fn start(target: &DatabaseTarget) -> Self {
        Self {
            target: target.clone(),
            output_format: POLLING_FORMAT.to_string(),
            current_bookmark: None,
        }
    }

    pub fn poll(target: &DatabaseTarget, bookmark: &Bookmark) -> Self {
        Self {
            current_bookmark: Some(bookmark.clone()),
            ..Self::start(target)
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/accounts/{}/d1/database/{}/export",
            base_url.trim_end_matches('/'),
            self.target.account_id,
            self.target.database_id
        )
    }

    pub fn body(&self) -> serde_json::Value {
        let mut body = json!({ "output_format": self.output_format });
        if let Some(bookmark) = &self.current_bookmark {
            body["current_bookmark"] = json!(bookmark.as_str());
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<ExportResult>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExportResult {
    at_bookmark: Option<String>,
    status: Option<String>,
    error: Option<String>,
    result: Option<DumpLocation>,
}

#[derive(Debug, Deserialize)]
struct DumpLocation {
    signed_url: Option<String>,
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let described: Vec<String> = errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{}: {}", code, e.message),
            None => e.message.clone(),
        })
        .collect();
    format!(" (service errors: {})", described.join("; "))
}

fn parse_bookmark(result: ExportResult) -> Result<Bookmark> {
    let raw = result
        .at_bookmark
        .ok_or_else(|| ExportError::ProtocolError("Missing `at_bookmark` in export response".into()))?;
    Bookmark::new(raw)
        .map_err(|_| ExportError::ProtocolError("Empty `at_bookmark` in export response".into()))
}

fn parse_status(result: ExportResult) -> Result<ExportStatus> {
    let signed_url = result
        .result
        .and_then(|location| location.signed_url)
        .filter(|url| !url.is_empty());

    match (result.status.as_deref(), signed_url) {
        (Some("complete"), Some(url)) | (None, Some(url)) => Ok(ExportStatus::Complete {
            signed_url: SignedUrl::new(url)
                .map_err(|e| ExportError::ProtocolError(e.to_string()))?,
        }),
        (Some("complete"), None) => Err(ExportError::ProtocolError(
            "Export reported complete without a `signed_url`".into(),
        )),
        (Some("active"), _) | (None, None) => Ok(ExportStatus::Active),
        (Some("error"), _) => Err(ExportError::ExportFailed(
            result.error.unwrap_or_else(|| "no error message given".to_string()),
        )),
        (Some(other), _) => Err(ExportError::ProtocolError(format!(
            "Unknown export status `{}`",
            other
        ))),
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// HTTP client for the database export endpoint.
///
/// Holds no per-export state; every call is a single POST.
pub struct ExportClient {
    client: Client,
    config: ClientConfig,
}

impl ExportClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ExportError::NetworkError(format!("HTTP client error: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn post(&self, request: &ExportRequest) -> Result<ExportResult> {
        let url = request.url(&self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .json(&request.body())
            .send()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ExportError::TransportError {
                status: status.as_u16(),
                body: clip_body(body),
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| ExportError::ProtocolError(format!("Malformed export response: {}", e)))?;

        envelope.result.ok_or_else(|| {
            ExportError::ProtocolError(format!(
                "Missing `result` in export response{}",
                describe_errors(&envelope.errors)
            ))
        })
    }
}

#[async_trait]
impl ExportApi for ExportClient {
    async fn start(&self, target: &DatabaseTarget) -> Result<Bookmark> {
        let result = self.post(&ExportRequest::start(target)).await?;
        let bookmark = parse_bookmark(result)?;
        info!(database = %target, "Export started");
        Ok(bookmark)
    }

    async fn poll(&self, target: &DatabaseTarget, bookmark: &Bookmark) -> Result<ExportStatus> {
        let result = self.post(&ExportRequest::poll(target, bookmark)).await?;
        let status = parse_status(result)?;
        debug!(database = %target, ?status, "Polled export");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const EXPORT_PATH: &str = "/accounts/acc/d1/database/db/export";

    fn target() -> DatabaseTarget {
        DatabaseTarget::new("acc", "db")
    }

    fn client_for(server: &mockito::Server) -> ExportClient {
        ExportClient::new(ClientConfig {
            base_url: server.url(),
            api_token: "secret".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn result(value: serde_json::Value) -> ExportResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let start = ExportRequest::start(&target());
        assert_eq!(start.url("https://api.example/v4/"), "https://api.example/v4/accounts/acc/d1/database/db/export");
        assert_eq!(start.body(), json!({ "output_format": "polling" }));

        let bookmark = Bookmark::new("bm1").unwrap();
        let poll = ExportRequest::poll(&target(), &bookmark);
        assert_eq!(poll.body(), json!({ "output_format": "polling", "current_bookmark": "bm1" }));
    }

    #[test]
    fn test_parse_status_variants() {
        assert_eq!(parse_status(result(json!({ "status": "active" }))).unwrap(), ExportStatus::Active);
        assert_eq!(parse_status(result(json!({}))).unwrap(), ExportStatus::Active);

        let complete = parse_status(result(json!({
            "status": "complete",
            "result": { "signed_url": "https://x/dump", "filename": "db.sql" }
        })))
        .unwrap();
        assert_eq!(
            complete,
            ExportStatus::Complete { signed_url: SignedUrl::new("https://x/dump").unwrap() }
        );

        let implicit = parse_status(result(json!({ "result": { "signed_url": "https://x/dump" } }))).unwrap();
        assert!(matches!(implicit, ExportStatus::Complete { .. }));
    }

    #[test]
    fn test_complete_without_url_is_protocol_error() {
        let err = parse_status(result(json!({ "status": "complete" }))).unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));

        let err = parse_status(result(json!({ "status": "complete", "result": { "signed_url": "" } }))).unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));
    }

    #[test]
    fn test_error_and_unknown_status() {
        let err = parse_status(result(json!({ "status": "error", "error": "disk full" }))).unwrap_err();
        assert!(matches!(err, ExportError::ExportFailed(ref m) if m == "disk full"));

        let err = parse_status(result(json!({ "status": "paused" }))).unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_start_returns_bookmark_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", EXPORT_PATH)
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({ "output_format": "polling" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"errors":[],"messages":[],"result":{"at_bookmark":"bm-0001/xyz"}}"#)
            .expect(1)
            .create_async()
            .await;

        let bookmark = client_for(&server).start(&target()).await.unwrap();
        assert_eq!(bookmark.as_str(), "bm-0001/xyz");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_start_without_bookmark_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", EXPORT_PATH)
            .with_status(200)
            .with_body(r#"{"success":true,"result":{"status":"active"}}"#)
            .create_async()
            .await;

        let err = client_for(&server).start(&target()).await.unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_poll_threads_bookmark() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", EXPORT_PATH)
            .match_body(Matcher::Json(json!({ "output_format": "polling", "current_bookmark": "bm1" })))
            .with_status(200)
            .with_body(r#"{"result":{"at_bookmark":"bm1","status":"complete","result":{"signed_url":"https://x/dump"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let bookmark = Bookmark::new("bm1").unwrap();
        let status = client_for(&server).poll(&target(), &bookmark).await.unwrap();
        assert_eq!(
            status,
            ExportStatus::Complete { signed_url: SignedUrl::new("https://x/dump").unwrap() }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_poll_without_result_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", EXPORT_PATH)
            .with_status(200)
            .with_body(r#"{"success":false,"errors":[{"code":7500,"message":"database is busy"}],"result":null}"#)
            .create_async()
            .await;

        let bookmark = Bookmark::new("bm1").unwrap();
        let err = client_for(&server).poll(&target(), &bookmark).await.unwrap_err();
        match err {
            ExportError::ProtocolError(message) => assert!(message.contains("database is busy")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_http_failure_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", EXPORT_PATH)
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let bookmark = Bookmark::new("bm1").unwrap();
        let err = client_for(&server).poll(&target(), &bookmark).await.unwrap_err();
        match err {
            ExportError::TransportError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", EXPORT_PATH)
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let err = client_for(&server).start(&target()).await.unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig {
            api_token: "secret".to_string(),
            ..ClientConfig::default()
        };
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
