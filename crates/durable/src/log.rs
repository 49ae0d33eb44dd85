use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{validate_run_id, Result};

/// Where completed step results are recorded.
#[async_trait]
pub trait StepLog: Send + Sync {
    /// Recorded result of `step` in `run_id`, if it completed before.
    async fn load(&self, run_id: &str, step: &str) -> Result<Option<Value>>;

    /// Record the result of a completed step. Must be durable on return.
    async fn record(&self, run_id: &str, step: &str, value: Value) -> Result<()>;

    /// Names of the completed steps of `run_id`.
    async fn steps(&self, run_id: &str) -> Result<Vec<String>>;
}

/// Step log that lives only as long as the process. Clones share entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStepLog {
    entries: Arc<RwLock<BTreeMap<(String, String), Value>>>,
}

impl MemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StepLog for MemoryStepLog {
    async fn load(&self, run_id: &str, step: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .read()
            .get(&(run_id.to_string(), step.to_string()))
            .cloned())
    }

    async fn record(&self, run_id: &str, step: &str, value: Value) -> Result<()> {
        validate_run_id(run_id)?;
        self.entries
            .write()
            .insert((run_id.to_string(), step.to_string()), value);
        Ok(())
    }

    async fn steps(&self, run_id: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|(run, _)| run == run_id)
            .map(|(_, step)| step.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let log = MemoryStepLog::new();
        log.record("run-a", "start-export", json!("bm1")).await.unwrap();
        log.record("run-b", "start-export", json!("bm2")).await.unwrap();

        assert_eq!(log.load("run-a", "start-export").await.unwrap(), Some(json!("bm1")));
        assert_eq!(log.load("run-b", "start-export").await.unwrap(), Some(json!("bm2")));
        assert_eq!(log.load("run-c", "start-export").await.unwrap(), None);
        assert_eq!(log.steps("run-a").await.unwrap(), vec!["start-export".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_bad_run_id() {
        let log = MemoryStepLog::new();
        assert!(log.record("", "s", json!(1)).await.is_err());
        assert!(log.record("a/b", "s", json!(1)).await.is_err());
        assert!(log.is_empty());
    }
}
