use chrono::{DateTime, Duration, Utc};
use d1_backup_storage::{ArchiveObject, ArchiveStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::timestamp::extract_uploaded_at;
use crate::Result;

/// Maximum age an archived object may reach before it is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow(Duration);

impl RetentionWindow {
    pub fn days(days: u32) -> Self {
        Self(Duration::days(days as i64))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Strictly older than the window. Objects from the future never expire.
    pub fn is_expired(&self, uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(uploaded_at) > self.0
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self::days(7)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub key: String,
    pub reason: String,
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub retained: usize,
    pub deleted: Vec<String>,
    /// Objects left alone because no upload time could be determined
    pub skipped: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

/// Deletes archive objects that have outlived the retention window.
pub struct RetentionPruner {
    store: Arc<dyn ArchiveStore>,
    window: RetentionWindow,
}

impl RetentionPruner {
    pub fn new(store: Arc<dyn ArchiveStore>, window: RetentionWindow) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> RetentionWindow {
        self.window
    }

    /// List the store and sweep everything in it.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let objects = self.store.list().await?;
        Ok(self.sweep(now, &objects).await)
    }

    /// Evaluate `objects` against the window as of `now`.
    ///
    /// Every object is evaluated: a failed delete is recorded and logged, and
    /// the sweep moves on. Objects without a parseable upload time are kept.
    pub async fn sweep(&self, now: DateTime<Utc>, objects: &[ArchiveObject]) -> SweepReport {
        let mut report = SweepReport {
            examined: objects.len(),
            ..SweepReport::default()
        };

        for object in objects {
            let uploaded_at = match extract_uploaded_at(&object.metadata) {
                Some(at) => at,
                None => {
                    warn!(key = %object.key, "No parseable upload time, keeping object");
                    report.skipped.push(object.key.clone());
                    continue;
                }
            };

            if !self.window.is_expired(uploaded_at, now) {
                report.retained += 1;
                continue;
            }

            let age_days = now.signed_duration_since(uploaded_at).num_seconds() as f64 / 86_400.0;
            match self.store.delete(&object.key).await {
                Ok(()) => {
                    debug!(key = %object.key, age_days, "Deleted expired backup");
                    report.deleted.push(object.key.clone());
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Failed to delete expired backup");
                    report.failed.push(DeleteFailure {
                        key: object.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            deleted = report.deleted.len(),
            retained = report.retained,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Retention sweep finished"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use d1_backup_storage::{MemoryArchiveStore, MetadataValue};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        "2024-05-20T03:00:00Z".parse().unwrap()
    }

    fn aged(key: &str, days: i64) -> ArchiveObject {
        ArchiveObject::uploaded_at(key, 1, now() - Duration::days(days))
    }

    fn seeded(objects: &[ArchiveObject]) -> MemoryArchiveStore {
        let store = MemoryArchiveStore::new();
        for object in objects {
            store.insert(object.clone(), "dump");
        }
        store
    }

    #[test]
    fn test_window_is_strict() {
        let window = RetentionWindow::default();
        assert!(!window.is_expired(now() - Duration::days(7), now()));
        assert!(window.is_expired(now() - Duration::days(7) - Duration::seconds(1), now()));
        assert!(!window.is_expired(now() + Duration::days(1), now()));
    }

    #[tokio::test]
    async fn test_deletes_only_expired() {
        let objects = vec![aged("three.sql", 3), aged("eight.sql", 8), aged("ten.sql", 10)];
        let store = seeded(&objects);
        let pruner = RetentionPruner::new(Arc::new(store.clone()), RetentionWindow::default());

        let report = pruner.prune(now()).await.unwrap();

        let mut deleted = report.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["eight.sql".to_string(), "ten.sql".to_string()]);
        assert_eq!(report.retained, 1);
        assert_eq!(store.keys(), vec!["three.sql".to_string()]);
    }

    #[tokio::test]
    async fn test_unparseable_timestamps_are_kept() {
        let objects = vec![
            ArchiveObject::new("no-meta.sql", 1),
            ArchiveObject::new("garbage.sql", 1)
                .with_field("uploaded", MetadataValue::Text("yesterday-ish".into())),
            ArchiveObject::new("legacy.sql", 1)
                .with_field("uploaded_on", MetadataValue::Text("2024-01-01T00:00:00Z".into())),
        ];
        let store = seeded(&objects);
        let pruner = RetentionPruner::new(Arc::new(store.clone()), RetentionWindow::default());

        let report = pruner.sweep(now(), &objects).await;

        assert_eq!(report.deleted, vec!["legacy.sql".to_string()]);
        assert_eq!(report.skipped, vec!["no-meta.sql".to_string(), "garbage.sql".to_string()]);
        assert!(store.contains("no-meta.sql"));
        assert!(store.contains("garbage.sql"));
        assert_eq!(store.delete_log(), vec!["legacy.sql".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_sweep() {
        let objects = vec![aged("a.sql", 9), aged("b.sql", 10), aged("c.sql", 11)];
        let store = seeded(&objects);
        store.fail_deletes_for("a.sql");
        let pruner = RetentionPruner::new(Arc::new(store.clone()), RetentionWindow::default());

        let report = pruner.sweep(now(), &objects).await;

        assert_eq!(report.deleted, vec!["b.sql".to_string(), "c.sql".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "a.sql");
        assert_eq!(store.keys(), vec!["a.sql".to_string()]);
    }

    #[tokio::test]
    async fn test_custom_window() {
        let objects = vec![aged("two.sql", 2), aged("three.sql", 3)];
        let store = seeded(&objects);
        let pruner = RetentionPruner::new(Arc::new(store.clone()), RetentionWindow::days(2));

        let report = pruner.sweep(now(), &objects).await;
        assert_eq!(report.deleted, vec!["three.sql".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_deletes_iff_older_than_window(ages_secs in proptest::collection::vec(-86_400i64..30 * 86_400, 0..20)) {
            let objects: Vec<ArchiveObject> = ages_secs
                .iter()
                .enumerate()
                .map(|(i, secs)| ArchiveObject::uploaded_at(format!("obj-{}.sql", i), 1, now() - Duration::seconds(*secs)))
                .collect();
            let store = seeded(&objects);
            let pruner = RetentionPruner::new(Arc::new(store.clone()), RetentionWindow::default());

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let report = runtime.block_on(pruner.sweep(now(), &objects));

            for (i, secs) in ages_secs.iter().enumerate() {
                let key = format!("obj-{}.sql", i);
                let expired = *secs > 7 * 86_400;
                prop_assert_eq!(report.deleted.contains(&key), expired);
                prop_assert_eq!(store.contains(&key), !expired);
            }
            prop_assert!(report.skipped.is_empty());
        }
    }
}
