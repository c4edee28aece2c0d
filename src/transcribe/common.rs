use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SubtitlerError};

/// A contiguous span of transcribed speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Ordered transcription result in the working language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub segments: Vec<TranscriptionSegment>,
    /// Language detected in the source audio, when the backend reports it
    pub detected_language: Option<String>,
}

/// Trait for converting service-specific transcription formats into `Transcription`
pub trait TranscriptionMapper<T> {
    fn to_transcription(service_result: T) -> Result<Transcription>;
}

/// Sort segments by start time and drop ones with inverted bounds
pub fn order_segments(mut segments: Vec<TranscriptionSegment>) -> Vec<TranscriptionSegment> {
    segments.retain(|s| s.start.is_finite() && s.end.is_finite() && s.end >= s.start);
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
}

/// Run a transcriber command to completion, failing on non-zero exit
pub async fn run_transcriber(mut cmd: Command, tool: &str) -> Result<()> {
    debug!("Executing {} command: {:?}", tool, cmd);

    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SubtitlerError::Transcriber(format!("Failed to execute {}: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SubtitlerError::Transcriber(format!(
            "{} failed ({}): {}",
            tool,
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

/// Check that a binary responds to `flag`
pub async fn probe_binary(binary: &str, flag: &str) -> Result<()> {
    let output = Command::new(binary)
        .arg(flag)
        .output()
        .await
        .map_err(|e| SubtitlerError::Transcriber(format!("{} not found: {}", binary, e)))?;

    if output.status.success() {
        info!("{} is available", binary);
        Ok(())
    } else {
        Err(SubtitlerError::Transcriber(format!("{} {} returned {}", binary, flag, output.status)))
    }
}

/// Read and decode a JSON file emitted by a transcriber
pub async fn read_json_output<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(SubtitlerError::Transcriber(format!(
            "Transcriber JSON output not found: {}",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SubtitlerError::Transcriber(format!("Failed to read transcriber output: {}", e)))?;

    serde_json::from_str(&content)
        .map_err(|e| SubtitlerError::Transcriber(format!("Failed to parse transcriber output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_segments() {
        let segments = vec![
            TranscriptionSegment { start: 2.0, end: 3.0, text: "b".into() },
            TranscriptionSegment { start: 5.0, end: 4.0, text: "inverted".into() },
            TranscriptionSegment { start: 0.0, end: 1.0, text: "a".into() },
        ];
        let ordered = order_segments(segments);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].text, "a");
        assert_eq!(ordered[1].text, "b");
    }
}
