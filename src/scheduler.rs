use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use d1_backup_types::DatabaseTarget;

use crate::workflow::{BackupWorkflow, RunSummary};

/// Fresh run id: UTC second plus 4 random bytes, e.g. `20240501T030000-9f3a01c2`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        now.format("%Y%m%dT%H%M%S"),
        hex::encode(rand::random::<[u8; 4]>())
    )
}

/// Starts a backup run at every fire time of a cron schedule.
pub struct Scheduler {
    schedule: Schedule,
    workflow: Arc<BackupWorkflow>,
    target: DatabaseTarget,
}

impl Scheduler {
    pub fn new(expression: &str, workflow: Arc<BackupWorkflow>, target: DatabaseTarget) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("Invalid cron expression `{}`", expression))?;

        Ok(Self {
            schedule,
            workflow,
            target,
        })
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Spawn one run with a new id. Runs are independent and may overlap.
    pub fn trigger(&self) -> JoinHandle<Option<RunSummary>> {
        let run_id = new_run_id(Utc::now());
        let workflow = self.workflow.clone();
        let target = self.target.clone();

        info!(run_id = %run_id, "Started backup workflow");
        tokio::spawn(async move {
            match workflow.run(&run_id, &target).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Backup run failed");
                    None
                }
            }
        })
    }

    /// Fire on schedule until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut after = Utc::now();

        loop {
            let next = match self.next_fire(after) {
                Some(next) => next,
                None => {
                    warn!("Schedule has no upcoming fire times, stopping");
                    return Ok(());
                }
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!("Next backup at {}", next);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = sleep(wait) => {}
            }

            // A fire time triggers at most once; times missed while asleep are skipped.
            after = next.max(Utc::now());
            self.trigger();
        }
    }
}
