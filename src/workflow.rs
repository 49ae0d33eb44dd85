use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use d1_backup_durable::{DurableError, StepLog, StepPolicy, StepRunner};
use d1_backup_export::{BookmarkPoller, DumpSource, ExportApi, ExportError, PollerConfig};
use d1_backup_retention::{DeleteFailure, RetentionError, RetentionPruner, RetentionWindow, SweepReport};
use d1_backup_storage::{archive_key, ArchiveStore, StorageError};
use d1_backup_types::{Bookmark, DatabaseTarget};

/// Step that starts the export and checkpoints its bookmark.
pub const START_STEP: &str = "start-export";
/// Step that polls, downloads, stores and prunes.
pub const ARCHIVE_STEP: &str = "archive-and-prune";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Retention(#[from] RetentionError),

    #[error(transparent)]
    Durable(#[from] DurableError),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub key: String,
    pub bytes: u64,
    pub pruned: Vec<String>,
    pub skipped: Vec<String>,
    pub failed_deletes: Vec<DeleteFailure>,
}

/// The scheduled backup: export, wait, download, store, prune.
///
/// Holds only shared handles and settings; all per-run state lives in the
/// [`StepRunner`] created by [`BackupWorkflow::run`], so concurrent runs do
/// not interfere.
pub struct BackupWorkflow {
    export: Arc<dyn ExportApi>,
    dumps: Arc<dyn DumpSource>,
    store: Arc<dyn ArchiveStore>,
    steps: Arc<dyn StepLog>,
    poller: PollerConfig,
    step_policy: StepPolicy,
    retention: RetentionWindow,
}

impl BackupWorkflow {
    pub fn new(
        export: Arc<dyn ExportApi>,
        dumps: Arc<dyn DumpSource>,
        store: Arc<dyn ArchiveStore>,
        steps: Arc<dyn StepLog>,
    ) -> Self {
        Self {
            export,
            dumps,
            store,
            steps,
            poller: PollerConfig::default(),
            step_policy: StepPolicy::default(),
            retention: RetentionWindow::default(),
        }
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_step_policy(mut self, policy: StepPolicy) -> Self {
        self.step_policy = policy;
        self
    }

    pub fn with_retention(mut self, window: RetentionWindow) -> Self {
        self.retention = window;
        self
    }

    /// Execute run `run_id`, resuming after whichever steps it already completed.
    pub async fn run(&self, run_id: &str, target: &DatabaseTarget) -> Result<RunSummary> {
        let runner = StepRunner::new(run_id, self.steps.clone(), self.step_policy.clone())?;
        info!(run_id, database = %target, "Backup run started");

        let bookmark: Bookmark = runner
            .run(START_STEP, move || self.start_export(target))
            .await?;

        let bookmark = &bookmark;
        let summary: RunSummary = runner
            .run(ARCHIVE_STEP, move || self.archive_and_prune(run_id, target, bookmark))
            .await?;

        info!(
            run_id,
            key = %summary.key,
            bytes = summary.bytes,
            pruned = summary.pruned.len(),
            "Backup run finished"
        );
        Ok(summary)
    }

    /// Sweep the bucket without taking a backup.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let pruner = RetentionPruner::new(self.store.clone(), self.retention);
        Ok(pruner.prune(now).await?)
    }

    async fn start_export(&self, target: &DatabaseTarget) -> Result<Bookmark> {
        Ok(self.export.start(target).await?)
    }

    async fn archive_and_prune(
        &self,
        run_id: &str,
        target: &DatabaseTarget,
        bookmark: &Bookmark,
    ) -> Result<RunSummary> {
        let poller = BookmarkPoller::new(self.export.clone(), self.poller.clone());
        let signed_url = poller.run(target, bookmark).await?;

        let dump = self.dumps.fetch(&signed_url).await?;

        let now = Utc::now();
        let key = archive_key(now);
        let bytes = self.store.put(&key, dump).await?;
        info!(run_id, key = %key, bytes, "Backup stored");

        let report = self.prune(now).await?;

        Ok(RunSummary {
            run_id: run_id.to_string(),
            key,
            bytes,
            pruned: report.deleted,
            skipped: report.skipped,
            failed_deletes: report.failed,
        })
    }
}
