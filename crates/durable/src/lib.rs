//! Checkpointed workflow steps.
//!
//! A step is a named unit of work inside a run. Its serialized result is
//! recorded under `(run_id, step)` once it succeeds; executing the same step
//! of the same run again returns the recorded result instead of redoing the
//! work, which lets an interrupted run resume where it left off.

pub mod log;
pub mod runner;
pub mod sled_log;

pub use log::{MemoryStepLog, StepLog};
pub use runner::{Backoff, RetryPolicy, StepPolicy, StepRunner};
pub use sled_log::SledStepLog;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DurableError {
    #[error("Step log error: {0}")]
    LogError(String),

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    #[error("Recorded result for step `{step}` is unreadable: {reason}")]
    Corrupt { step: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Step `{step}` timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, DurableError>;

impl From<sled::Error> for DurableError {
    fn from(e: sled::Error) -> Self {
        DurableError::LogError(e.to_string())
    }
}

pub(crate) fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() || run_id.contains('/') {
        return Err(DurableError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}
