use d1_backup_types::{Bookmark, DatabaseTarget, SignedUrl};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{ExportApi, ExportError, ExportStatus, Result};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum number of status polls before giving up
    pub max_attempts: u32,
    /// Pause between consecutive polls
    pub inter_attempt_delay: Duration,
    /// Optional wall-clock ceiling over the whole loop
    pub deadline: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            inter_attempt_delay: Duration::from_secs(2),
            deadline: None,
        }
    }
}

/// Polls an export until it completes, reusing the bookmark from `start`.
pub struct BookmarkPoller {
    api: Arc<dyn ExportApi>,
    config: PollerConfig,
}

impl BookmarkPoller {
    pub fn new(api: Arc<dyn ExportApi>, config: PollerConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll until the export is complete and return its signed URL.
    ///
    /// Issues at most `max_attempts` polls with `inter_attempt_delay` between
    /// them (none after the last). Any error from the export API aborts the
    /// loop immediately.
    pub async fn run(&self, target: &DatabaseTarget, bookmark: &Bookmark) -> Result<SignedUrl> {
        let mut attempts = 0u32;

        let outcome = match self.config.deadline {
            Some(deadline) => {
                match timeout_at(Instant::now() + deadline, self.poll_loop(target, bookmark, &mut attempts)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(attempts, ?deadline, "Export polling hit its deadline");
                        Err(ExportError::ExportTimeout { attempts })
                    }
                }
            }
            None => self.poll_loop(target, bookmark, &mut attempts).await,
        };

        if let Ok(url) = &outcome {
            info!(attempts, "Export complete");
            debug!(signed_url = %url, "Dump location");
        }
        outcome
    }

    async fn poll_loop(
        &self,
        target: &DatabaseTarget,
        bookmark: &Bookmark,
        attempts: &mut u32,
    ) -> Result<SignedUrl> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            *attempts = attempt;
            debug!(attempt, max_attempts, "Polling export status");

            match self.api.poll(target, bookmark).await? {
                ExportStatus::Complete { signed_url } => return Ok(signed_url),
                ExportStatus::Active => {
                    if attempt < max_attempts {
                        sleep(self.config.inter_attempt_delay).await;
                    }
                }
            }
        }

        warn!(max_attempts, "Export still active after exhausting poll budget");
        Err(ExportError::ExportTimeout { attempts: max_attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted poll answers; once the script runs dry it stays active.
    #[derive(Default)]
    struct ScriptedExport {
        script: Mutex<VecDeque<Result<ExportStatus>>>,
        seen_bookmarks: Mutex<Vec<String>>,
    }

    impl ScriptedExport {
        fn new(script: Vec<Result<ExportStatus>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen_bookmarks: Mutex::new(Vec::new()),
            })
        }

        fn polls(&self) -> usize {
            self.seen_bookmarks.lock().len()
        }
    }

    #[async_trait]
    impl ExportApi for ScriptedExport {
        async fn start(&self, _target: &DatabaseTarget) -> Result<Bookmark> {
            Ok(Bookmark::new("bm1").unwrap())
        }

        async fn poll(&self, _target: &DatabaseTarget, bookmark: &Bookmark) -> Result<ExportStatus> {
            self.seen_bookmarks.lock().push(bookmark.to_string());
            self.script.lock().pop_front().unwrap_or(Ok(ExportStatus::Active))
        }
    }

    fn complete(url: &str) -> Result<ExportStatus> {
        Ok(ExportStatus::Complete { signed_url: SignedUrl::new(url).unwrap() })
    }

    fn target() -> DatabaseTarget {
        DatabaseTarget::new("acc", "db")
    }

    // Paused time advances to timer deadlines rounded up to the millisecond.
    fn assert_elapsed(started: Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(100),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_complete() {
        let api = ScriptedExport::new(vec![
            Ok(ExportStatus::Active),
            complete("https://x/dump"),
            complete("https://x/other"),
        ]);
        let poller = BookmarkPoller::new(api.clone(), PollerConfig::default());

        let started = Instant::now();
        let url = poller.run(&target(), &Bookmark::new("bm1").unwrap()).await.unwrap();

        assert_eq!(url.as_str(), "https://x/dump");
        assert_eq!(api.polls(), 2);
        assert_eq!(*api.seen_bookmarks.lock(), vec!["bm1".to_string(), "bm1".to_string()]);
        assert_elapsed(started, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_times_out() {
        let api = ScriptedExport::new(vec![]);
        let poller = BookmarkPoller::new(api.clone(), PollerConfig::default());

        let started = Instant::now();
        let err = poller.run(&target(), &Bookmark::new("bm1").unwrap()).await.unwrap_err();

        assert!(matches!(err, ExportError::ExportTimeout { attempts: 60 }));
        assert_eq!(api.polls(), 60);
        // 59 pauses between 60 polls, none after the last one.
        assert_elapsed(started, Duration::from_secs(59 * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_error_aborts_loop() {
        let api = ScriptedExport::new(vec![
            Ok(ExportStatus::Active),
            Err(ExportError::ProtocolError("missing result".into())),
            complete("https://x/dump"),
        ]);
        let poller = BookmarkPoller::new(api.clone(), PollerConfig::default());

        let err = poller.run(&target(), &Bookmark::new("bm1").unwrap()).await.unwrap_err();
        assert!(matches!(err, ExportError::ProtocolError(_)));
        assert_eq!(api.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_caps_wall_clock() {
        let api = ScriptedExport::new(vec![]);
        let config = PollerConfig {
            deadline: Some(Duration::from_secs(5)),
            ..PollerConfig::default()
        };
        let poller = BookmarkPoller::new(api.clone(), config);

        let err = poller.run(&target(), &Bookmark::new("bm1").unwrap()).await.unwrap_err();
        // Polls at t=0s, 2s and 4s; the next pause would cross the deadline.
        assert!(matches!(err, ExportError::ExportTimeout { attempts: 3 }));
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_never_polls() {
        let api = ScriptedExport::new(vec![complete("https://x/dump")]);
        let config = PollerConfig {
            max_attempts: 0,
            ..PollerConfig::default()
        };
        let poller = BookmarkPoller::new(api.clone(), config);

        let err = poller.run(&target(), &Bookmark::new("bm1").unwrap()).await.unwrap_err();
        assert!(matches!(err, ExportError::ExportTimeout { attempts: 0 }));
        assert_eq!(api.polls(), 0);
    }
}
