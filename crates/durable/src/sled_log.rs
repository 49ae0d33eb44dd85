use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::task;
use tracing::info;

use crate::{validate_run_id, DurableError, Result, StepLog};

/// Step log persisted in a sled tree, one entry per `<run_id>/<step>` key.
#[derive(Clone)]
pub struct SledStepLog {
    db: sled::Db,
}

impl SledStepLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!("Opened step log at {}", path.as_ref().display());
        Ok(Self { db })
    }

    fn key(run_id: &str, step: &str) -> String {
        format!("{}/{}", run_id, step)
    }
}

#[async_trait]
impl StepLog for SledStepLog {
    async fn load(&self, run_id: &str, step: &str) -> Result<Option<Value>> {
        match self.db.get(Self::key(run_id, step))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| DurableError::Corrupt {
                    step: step.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn record(&self, run_id: &str, step: &str, value: Value) -> Result<()> {
        validate_run_id(run_id)?;
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| DurableError::SerializationError(e.to_string()))?;
        self.db.insert(Self::key(run_id, step), bytes)?;

        let db = self.db.clone();
        task::spawn_blocking(move || db.flush())
            .await
            .map_err(|e| DurableError::LogError(e.to_string()))??;
        Ok(())
    }

    async fn steps(&self, run_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", run_id);
        let mut steps = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            if let Some(step) = key.strip_prefix(&prefix) {
                steps.push(step.to_string());
            }
        }
        Ok(steps)
    }
}
