use tokio::process::Command;
use tracing::info;

use super::{AcquisitionWorker, TransferOptions};
use crate::config::AcquisitionConfig;
use crate::error::{Result, SubtitlerError};

/// Downloads with the `yt-dlp` command-line tool
pub struct YtDlpWorker {
    config: AcquisitionConfig,
}

impl YtDlpWorker {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self { config }
    }

    /// Check that the configured binary runs and report its version
    pub async fn check_availability(&self) -> Result<String> {
        let output = Command::new(&self.config.binary_path)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubtitlerError::Config(format!("{} not found: {}", self.config.binary_path, e)))?;

        if !output.status.success() {
            return Err(SubtitlerError::Config(format!(
                "{} --version returned {}",
                self.config.binary_path, output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("{} {} is available", self.config.binary_path, version);
        Ok(version)
    }

    fn format_args(options: &TransferOptions) -> Vec<String> {
        if options.audio_only {
            vec![
                "-f".into(),
                "bestaudio/best".into(),
                "-x".into(),
                "--audio-format".into(),
                "mp3".into(),
                "--audio-quality".into(),
                "192K".into(),
            ]
        } else {
            vec![
                "-f".into(),
                format!("bv*[height<={}]+ba/bv+ba/b[ext=mp4]/best", options.max_resolution),
                "--merge-output-format".into(),
                "mp4".into(),
            ]
        }
    }
}

impl AcquisitionWorker for YtDlpWorker {
    fn command(&self, locator: &str, options: &TransferOptions) -> Command {
        let template = options
            .output_dir
            .join(format!("{}%(title).200B.%(ext)s", options.file_prefix));
        let retries = self.config.max_retries.to_string();

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(["--no-playlist", "--continue", "--newline", "--progress", "--no-warnings"])
            .arg("--restrict-filenames");
        // Zero means unlimited
        if options.rate_limit > 0 {
            cmd.arg("--limit-rate").arg(options.rate_limit.to_string());
        }
        cmd.arg("--retries").arg(&retries)
            .arg("--fragment-retries").arg(&retries)
            .arg("--extractor-retries").arg(&retries)
            .arg("--socket-timeout").arg(self.config.socket_timeout_secs.to_string())
            .arg("--http-chunk-size").arg(&self.config.http_chunk_size)
            .args(Self::format_args(options))
            .arg("-o").arg(template)
            .arg("--progress-template").arg("download:PROGRESS %(progress)j")
            .arg("--print").arg("after_move:RESULT %(.{filepath,title})j")
            .arg("--no-simulate")
            .arg("--")
            .arg(locator);
        cmd
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}
