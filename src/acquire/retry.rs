use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::worker::{AttemptFailure, run_attempt};
use super::{AcquiredMedia, AcquisitionWorker, MediaAcquirer, ProgressSink, TransferOptions};
use crate::config::AcquisitionConfig;
use crate::error::{Result, SubtitlerError};

/// Drives bounded download attempts with exponential backoff
pub struct RetryController {
    worker: Arc<dyn AcquisitionWorker>,
    max_retries: u32,
    per_attempt_timeout: Duration,
    initial_backoff: Duration,
}

impl RetryController {
    pub fn new(worker: Arc<dyn AcquisitionWorker>, config: &AcquisitionConfig) -> Self {
        Self::with_policy(
            worker,
            config.max_retries,
            config.per_attempt_timeout(),
            config.initial_backoff(),
        )
    }

    pub fn with_policy(
        worker: Arc<dyn AcquisitionWorker>,
        max_retries: u32,
        per_attempt_timeout: Duration,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            worker,
            max_retries: max_retries.max(1),
            per_attempt_timeout,
            initial_backoff,
        }
    }

    async fn attempt(
        &self,
        locator: &str,
        options: &TransferOptions,
        progress: Option<ProgressSink>,
    ) -> std::result::Result<AcquiredMedia, AttemptFailure> {
        let media = run_attempt(
            self.worker.as_ref(),
            locator,
            options,
            self.per_attempt_timeout,
            progress,
        )
        .await?;
        verify_file(media).await
    }
}

#[async_trait]
impl MediaAcquirer for RetryController {
    async fn acquire(
        &self,
        locator: &str,
        options: &TransferOptions,
        progress: Option<ProgressSink>,
    ) -> Result<AcquiredMedia> {
        let mut delay = self.initial_backoff;
        let mut last_failure = AttemptFailure::NoResult;

        for attempt in 1..=self.max_retries {
            info!(attempt, max_attempts = self.max_retries, "Downloading {}", locator);

            match self.attempt(locator, options, progress.clone()).await {
                Ok(media) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "Download succeeded after retry");
                    }
                    return Ok(media);
                }
                Err(failure) if !failure.is_retryable() => {
                    warn!(attempt, error = %failure, "Download failed permanently");
                    return Err(SubtitlerError::Acquisition {
                        attempts: attempt,
                        reason: failure.to_string(),
                    });
                }
                Err(failure) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_retries,
                        error = %failure,
                        "Download attempt failed"
                    );
                    last_failure = failure;
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(SubtitlerError::Acquisition {
            attempts: self.max_retries,
            reason: last_failure.to_string(),
        })
    }
}

/// A reported file only counts when it exists and is non-empty
///
/// An empty file is deleted so a resuming worker cannot report it again.
async fn verify_file(media: AcquiredMedia) -> std::result::Result<AcquiredMedia, AttemptFailure> {
    match tokio::fs::metadata(&media.path).await {
        Ok(meta) if meta.len() > 0 => Ok(media),
        Ok(_) => {
            if let Err(e) = tokio::fs::remove_file(&media.path).await {
                warn!("Failed to remove empty download {}: {}", media.path.display(), e);
            }
            Err(AttemptFailure::EmptyFile(media.path))
        }
        Err(_) => Err(AttemptFailure::MissingFile(media.path)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use tokio::process::Command;

    use crate::acquire::DownloadProgress;

    /// Stand-in worker that runs a shell script
    struct ScriptWorker {
        script: String,
        starts: AtomicU32,
    }

    impl ScriptWorker {
        fn new(script: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                script: script.into(),
                starts: AtomicU32::new(0),
            })
        }
    }

    impl AcquisitionWorker for ScriptWorker {
        fn command(&self, _locator: &str, _options: &TransferOptions) -> Command {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.script);
            cmd
        }

        fn name(&self) -> &str {
            "script"
        }
    }

    fn options(dir: &std::path::Path) -> TransferOptions {
        TransferOptions {
            max_resolution: 1080,
            audio_only: false,
            rate_limit: 0,
            output_dir: dir.to_path_buf(),
            file_prefix: "task_".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hanging_worker_times_out_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ScriptWorker::new("sleep 30");
        let controller = RetryController::with_policy(
            worker.clone(),
            3,
            Duration::from_millis(200),
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let err = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        // 3 timeouts plus 100ms and 200ms of backoff
        assert!(elapsed >= Duration::from_millis(900), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(20), "worker was not killed: {:?}", elapsed);
        assert_eq!(worker.starts.load(Ordering::SeqCst), 3);
        match err {
            SubtitlerError::Acquisition { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("timed out"), "{}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ScriptWorker::new(r#"echo 'RESULT {"filepath":"/nonexistent/clip.mp4","title":"Clip"}'"#);
        let controller =
            RetryController::with_policy(worker.clone(), 2, Duration::from_secs(10), Duration::from_millis(10));

        let err = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap_err();

        assert_eq!(worker.starts.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("does not exist"), "{}", err);
    }

    #[tokio::test]
    async fn test_empty_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_empty.mp4");
        let worker = ScriptWorker::new(format!(
            r#": > '{p}'; echo 'RESULT {{"filepath":"{p}","title":"Empty"}}'"#,
            p = path.display()
        ));
        let controller =
            RetryController::with_policy(worker.clone(), 2, Duration::from_secs(10), Duration::from_millis(10));

        let err = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap_err();

        assert_eq!(worker.starts.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("is empty"), "{}", err);
    }

    #[tokio::test]
    async fn test_empty_file_is_removed_before_the_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_Clip.mp4");
        let marker = dir.path().join("first-attempt");
        let worker = ScriptWorker::new(format!(
            r#"if [ -f '{m}' ]; then
                 if [ -e '{p}' ]; then echo 'ERROR: stale file reused' >&2; exit 1; fi
                 printf data > '{p}'
               else
                 touch '{m}'; : > '{p}'
               fi
               echo 'RESULT {{"filepath":"{p}","title":"Clip"}}'"#,
            m = marker.display(),
            p = path.display()
        ));
        let controller =
            RetryController::with_policy(worker.clone(), 2, Duration::from_secs(10), Duration::from_millis(10));

        let media = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap();

        assert_eq!(worker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read(&media.path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_result_is_not_held_up_by_lingering_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_Clip.mp4");
        let worker = ScriptWorker::new(format!(
            r#"sleep 5 & printf data > '{p}'; echo 'RESULT {{"filepath":"{p}","title":"Clip"}}'; exit 0"#,
            p = path.display()
        ));
        let controller =
            RetryController::with_policy(worker.clone(), 1, Duration::from_secs(10), Duration::from_millis(10));

        let started = Instant::now();
        let media = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap();

        assert_eq!(media.title, "Clip");
        assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_worker_without_result() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ScriptWorker::new("exit 0");
        let controller =
            RetryController::with_policy(worker.clone(), 1, Duration::from_secs(10), Duration::from_millis(10));

        let err = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no result from worker"), "{}", err);
    }

    #[tokio::test]
    async fn test_unsupported_url_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ScriptWorker::new("echo 'ERROR: Unsupported URL: https://example.com/v' >&2; exit 1");
        let controller =
            RetryController::with_policy(worker.clone(), 3, Duration::from_secs(10), Duration::from_millis(10));

        let err = controller
            .acquire("https://example.com/v", &options(dir.path()), None)
            .await
            .unwrap_err();

        assert_eq!(worker.starts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SubtitlerError::Acquisition { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_successful_download_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("task_Clip.mp4");
        let worker = ScriptWorker::new(format!(
            r#"echo 'PROGRESS {{"status":"downloading","downloaded_bytes":"5","total_bytes":10}}' >&2; printf data > '{p}'; echo 'RESULT {{"filepath":"{p}","title":"Clip"}}'"#,
            p = path.display()
        ));
        let controller =
            RetryController::with_policy(worker.clone(), 3, Duration::from_secs(10), Duration::from_millis(10));

        let seen: Arc<Mutex<Vec<DownloadProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ProgressSink = Arc::new(move |p| sink_seen.lock().unwrap().push(p));

        let media = controller
            .acquire("https://example.com/v", &options(dir.path()), Some(sink))
            .await
            .unwrap();

        assert_eq!(media.path, path);
        assert_eq!(media.title, "Clip");
        assert_eq!(worker.starts.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0].fraction(), 0.5);
    }
}
