use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use super::common::{order_segments, probe_binary, read_json_output, run_transcriber};
use super::{Transcription, TranscriberTrait, TranscriptionMapper, TranscriptionSegment};
use crate::config::TranscriberConfig;
use crate::error::Result;

/// whisper.cpp `-oj` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub result: Option<WhisperCppResult>,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Segment bounds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

pub struct WhisperCppMapper;

impl TranscriptionMapper<WhisperCppOutput> for WhisperCppMapper {
    fn to_transcription(output: WhisperCppOutput) -> Result<Transcription> {
        let segments: Vec<TranscriptionSegment> = output
            .transcription
            .into_iter()
            .map(|seg| TranscriptionSegment {
                start: seg.offsets.from.max(0) as f64 / 1000.0,
                end: seg.offsets.to.max(0) as f64 / 1000.0,
                text: seg.text.trim().to_string(),
            })
            .collect();

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Transcription {
            text,
            segments: order_segments(segments),
            detected_language: output.result.map(|r| r.language),
        })
    }
}

pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, audio_path: &Path, output_base: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-m").arg(&self.config.model)
            .arg("-f").arg(audio_path)
            .arg("--language").arg("auto")
            .arg("--translate")
            .arg("-oj")
            .arg("-of").arg(output_base)
            .args(&self.config.extra_args);
        cmd
    }
}

#[async_trait]
impl TranscriberTrait for WhisperCppTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription> {
        info!("Transcribing audio with whisper.cpp: {}", audio_path.display());

        let temp_dir = tempfile::tempdir()?;
        let output_base = temp_dir.path().join("transcript");

        run_transcriber(self.build_command(audio_path, &output_base), &self.config.binary_path).await?;

        let output: WhisperCppOutput = read_json_output(&output_base.with_extension("json")).await?;
        let transcription = WhisperCppMapper::to_transcription(output)?;

        info!("Transcription completed. Found {} segments", transcription.segments.len());
        Ok(transcription)
    }

    async fn check_availability(&self) -> Result<()> {
        probe_binary(&self.config.binary_path, "--help").await
    }
}
