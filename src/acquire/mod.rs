// Remote media acquisition
//
// - worker: runs one attempt in a child process group and reads its tagged output
// - ytdlp: the production worker command
// - retry: bounded attempts with exponential backoff and result verification

pub mod retry;
pub mod worker;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use retry::RetryController;
pub use worker::{AttemptFailure, coerce_number};
pub use ytdlp::YtDlpWorker;

use crate::error::Result;

/// Per-download settings handed to a worker
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub max_resolution: u32,
    pub audio_only: bool,
    /// Bytes per second
    pub rate_limit: u64,
    pub output_dir: PathBuf,
    /// Prepended to the downloaded file name so tasks never collide
    pub file_prefix: String,
}

/// A successfully downloaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredMedia {
    #[serde(rename = "filepath")]
    pub path: PathBuf,
    #[serde(default)]
    pub title: String,
}

/// Progress snapshot with every numeric field coerced to `f64`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
    pub status: String,
    pub downloaded_bytes: f64,
    pub total_bytes: f64,
    pub speed: f64,
    pub eta: f64,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`; zero when the total is unknown
    pub fn fraction(&self) -> f64 {
        if self.total_bytes > 0.0 {
            (self.downloaded_bytes / self.total_bytes).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

pub type ProgressSink = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Builds the child process that performs a single download attempt
pub trait AcquisitionWorker: Send + Sync {
    fn command(&self, locator: &str, options: &TransferOptions) -> Command;

    fn name(&self) -> &str;
}

/// Fetches a remote locator into a local file
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(
        &self,
        locator: &str,
        options: &TransferOptions,
        progress: Option<ProgressSink>,
    ) -> Result<AcquiredMedia>;
}

/// Remove files in `dir` whose names start with `prefix`; returns how many were removed
pub fn sweep_partial_downloads(dir: &Path, prefix: &str) -> usize {
    if prefix.is_empty() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed partial download {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove partial download {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Filesystem-safe form of a title: word characters and dashes joined by underscores
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect();

    kept.split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Video: Part #1!"), "My_Video_Part_1");
        assert_eq!(sanitize_name("  __a   b__ "), "a_b");
        assert_eq!(sanitize_name("déjà vu"), "déjà_vu");
        assert_eq!(sanitize_name(&"x".repeat(300)).len(), 200);
    }

    #[test]
    fn test_progress_fraction() {
        let progress = DownloadProgress {
            downloaded_bytes: 50.0,
            total_bytes: 200.0,
            ..DownloadProgress::default()
        };
        assert_eq!(progress.fraction(), 0.25);
        assert_eq!(DownloadProgress::default().fraction(), 0.0);
    }

    #[test]
    fn test_sweep_only_touches_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc_clip.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("abc_clip.f137.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("other_clip.mp4"), b"x").unwrap();

        assert_eq!(sweep_partial_downloads(dir.path(), "abc_"), 2);
        assert!(dir.path().join("other_clip.mp4").exists());
        assert_eq!(sweep_partial_downloads(dir.path(), ""), 0);
    }
}
