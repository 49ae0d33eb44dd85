use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::{validate_run_id, DurableError, Result, StepLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt
    pub limit: u32,
    /// Base delay before the first retry
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            limit: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Constant,
        }
    }

    /// Pause before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(retry.saturating_add(1)),
            Backoff::Exponential => self.delay.saturating_mul(2u32.saturating_pow(retry)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPolicy {
    pub retries: RetryPolicy,
    /// Limit on a single attempt
    pub timeout: Duration,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            retries: RetryPolicy::default(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Executes the steps of one run against a step log.
pub struct StepRunner {
    run_id: String,
    log: Arc<dyn StepLog>,
    policy: StepPolicy,
}

impl StepRunner {
    pub fn new(run_id: impl Into<String>, log: Arc<dyn StepLog>, policy: StepPolicy) -> Result<Self> {
        let run_id = run_id.into();
        validate_run_id(&run_id)?;
        Ok(Self { run_id, log, policy })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run step `name`, or return its recorded result if this run already
    /// completed it.
    ///
    /// Each attempt is bounded by the policy timeout; failed attempts are
    /// retried with backoff until the retry limit, after which the last
    /// error is returned. Only a successful result is recorded.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut step: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<DurableError> + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(recorded) = self.log.load(&self.run_id, name).await? {
            info!(run_id = %self.run_id, step = name, "Step already completed, reusing recorded result");
            return serde_json::from_value(recorded).map_err(|e| {
                E::from(DurableError::Corrupt {
                    step: name.to_string(),
                    reason: e.to_string(),
                })
            });
        }

        let mut retry = 0u32;
        loop {
            let outcome = match timeout(self.policy.timeout, step()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(E::from(DurableError::Timeout {
                    step: name.to_string(),
                    timeout: self.policy.timeout,
                })),
            };

            match outcome {
                Ok(value) => {
                    let recorded = serde_json::to_value(&value)
                        .map_err(|e| DurableError::SerializationError(e.to_string()))?;
                    self.log.record(&self.run_id, name, recorded).await?;
                    info!(run_id = %self.run_id, step = name, attempts = retry + 1, "Step completed");
                    return Ok(value);
                }
                Err(e) if retry < self.policy.retries.limit => {
                    let delay = self.policy.retries.delay_for(retry);
                    warn!(
                        run_id = %self.run_id,
                        step = name,
                        attempt = retry + 1,
                        error = %e,
                        "Step failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    error!(run_id = %self.run_id, step = name, attempts = retry + 1, error = %e, "Step failed");
                    return Err(e);
                }
            }
        }
    }
}
