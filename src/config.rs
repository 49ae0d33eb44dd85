use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use d1_backup_durable::{Backoff, RetryPolicy, StepPolicy};
use d1_backup_export::{ClientConfig, PollerConfig};
use d1_backup_retention::RetentionWindow;
use d1_backup_types::DatabaseTarget;
use serde::{Deserialize, Serialize};

/// Complete backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database service API
    pub api: ApiConfig,
    /// Archive bucket
    pub bucket: BucketConfig,
    /// Export status polling
    pub poller: PollerSettings,
    /// Durable step retries
    pub steps: StepSettings,
    /// Trigger schedule
    pub schedule: ScheduleConfig,
    /// Directory holding the step log
    pub data_dir: PathBuf,
    /// Logging
    pub log: LogConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the service API
    pub base_url: String,
    pub account_id: String,
    pub database_id: String,
    /// Bearer token for the export endpoint
    pub api_token: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Directory used as the archive bucket
    pub path: PathBuf,
    /// Days an archive is kept before pruning
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
    /// Optional wall-clock ceiling for the whole poll loop
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSettings {
    pub retry_limit: u32,
    pub retry_delay_secs: u64,
    pub backoff: Backoff,
    /// Limit on a single attempt of a step
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Cron expression, seconds field first
    pub cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level
    pub level: String,
    /// Enable JSON logging
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            bucket: BucketConfig::default(),
            poller: PollerSettings::default(),
            steps: StepSettings::default(),
            schedule: ScheduleConfig::default(),
            data_dir: PathBuf::from("./data"),
            log: LogConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudflare.com/client/v4".to_string(),
            account_id: String::new(),
            database_id: String::new(),
            api_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("database_id", &self.database_id)
            .field("api_token", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./backups"),
            retention_days: 7,
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay_secs: 2,
            deadline_secs: None,
        }
    }
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            retry_delay_secs: 10,
            backoff: Backoff::Exponential,
            timeout_secs: 600, // 10 minutes
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 3 * * *".to_string(), // daily at 03:00 UTC
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context("Failed to read configuration file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse configuration")?;

        Ok(config)
    }

    /// Load the optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
        config.validate()?;
        Ok(config)
    }

    /// Override settings from environment variables, looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("ACCOUNT_ID") {
            self.api.account_id = v;
        }
        if let Some(v) = var("DATABASE_ID") {
            self.api.database_id = v;
        }
        if let Some(v) = var("D1_REST_API_TOKEN") {
            self.api.api_token = v;
        }
        if let Some(v) = var("D1_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = var("BACKUP_BUCKET") {
            self.bucket.path = PathBuf::from(v);
        }
        if let Some(v) = var("BACKUP_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("BACKUP_SCHEDULE") {
            self.schedule.cron = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.account_id.is_empty() {
            anyhow::bail!("account_id must be set (ACCOUNT_ID)");
        }

        if self.api.database_id.is_empty() {
            anyhow::bail!("database_id must be set (DATABASE_ID)");
        }

        if self.api.api_token.is_empty() {
            anyhow::bail!("api_token must be set (D1_REST_API_TOKEN)");
        }

        if self.poller.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.bucket.retention_days == 0 {
            anyhow::bail!("retention_days must be greater than 0");
        }

        Ok(())
    }

    pub fn target(&self) -> DatabaseTarget {
        DatabaseTarget::new(&self.api.account_id, &self.api.database_id)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            api_token: self.api.api_token.clone(),
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            max_attempts: self.poller.max_attempts,
            inter_attempt_delay: Duration::from_secs(self.poller.delay_secs),
            deadline: self.poller.deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn step_policy(&self) -> StepPolicy {
        StepPolicy {
            retries: RetryPolicy {
                limit: self.steps.retry_limit,
                delay: Duration::from_secs(self.steps.retry_delay_secs),
                backoff: self.steps.backoff,
            },
            timeout: Duration::from_secs(self.steps.timeout_secs),
        }
    }

    pub fn retention_window(&self) -> RetentionWindow {
        RetentionWindow::days(self.bucket.retention_days)
    }

    pub fn step_log_path(&self) -> PathBuf {
        self.data_dir.join("steps")
    }
}
