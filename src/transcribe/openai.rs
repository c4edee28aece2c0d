// OpenAI Whisper command-line implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use super::common::{order_segments, probe_binary, read_json_output, run_transcriber};
use super::{Transcription, TranscriberTrait, TranscriptionMapper, TranscriptionSegment};
use crate::config::TranscriberConfig;
use crate::error::{Result, SubtitlerError};

/// OpenAI Whisper specific JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperOutput {
    pub text: String,
    pub segments: Vec<OpenAIWhisperSegment>,
    pub language: Option<String>,
}

/// OpenAI Whisper specific segment format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperSegment {
    pub id: u64,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub struct OpenAIWhisperMapper;

impl TranscriptionMapper<OpenAIWhisperOutput> for OpenAIWhisperMapper {
    fn to_transcription(output: OpenAIWhisperOutput) -> Result<Transcription> {
        let segments = output
            .segments
            .into_iter()
            .map(|seg| TranscriptionSegment {
                start: seg.start,
                end: seg.end,
                text: seg.text.trim().to_string(),
            })
            .collect();

        Ok(Transcription {
            text: output.text.trim().to_string(),
            segments: order_segments(segments),
            detected_language: output.language,
        })
    }
}

pub struct OpenAITranscriber {
    config: TranscriberConfig,
}

impl OpenAITranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, audio_path: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model").arg(&self.config.model)
            .arg("--task").arg("translate")
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("json")
            .arg("--verbose").arg("False")
            .arg("--fp16").arg("False")
            .args(&self.config.extra_args);
        cmd
    }
}

#[async_trait]
impl TranscriberTrait for OpenAITranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription> {
        info!("Transcribing audio with OpenAI Whisper ({}): {}", self.config.model, audio_path.display());

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubtitlerError::Transcriber(format!("Failed to create temp directory: {}", e)))?;

        run_transcriber(self.build_command(audio_path, temp_dir.path()), &self.config.binary_path).await?;

        let audio_stem = audio_path
            .file_stem()
            .ok_or_else(|| SubtitlerError::Transcriber("Invalid audio filename".to_string()))?;
        let json_file = temp_dir.path().join(format!("{}.json", audio_stem.to_string_lossy()));

        let output: OpenAIWhisperOutput = read_json_output(&json_file).await?;
        let transcription = OpenAIWhisperMapper::to_transcription(output)?;

        info!(
            "Transcription completed. Detected language: {}, {} segments",
            transcription.detected_language.as_deref().unwrap_or("unknown"),
            transcription.segments.len()
        );
        Ok(transcription)
    }

    async fn check_availability(&self) -> Result<()> {
        probe_binary(&self.config.binary_path, "--help").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_whisper_json() {
        let json = r#"{
            "text": " Hello world. Bye.",
            "segments": [
                {"id": 1, "seek": 0, "start": 1.5, "end": 2.0, "text": " Bye.", "tokens": [1, 2]},
                {"id": 0, "seek": 0, "start": 0.0, "end": 1.5, "text": " Hello world.", "avg_logprob": -0.2}
            ],
            "language": "fr"
        }"#;
        let output: OpenAIWhisperOutput = serde_json::from_str(json).unwrap();
        let transcription = OpenAIWhisperMapper::to_transcription(output).unwrap();

        assert_eq!(transcription.detected_language.as_deref(), Some("fr"));
        assert_eq!(transcription.segments[0].text, "Hello world.");
        assert_eq!(transcription.segments[1].start, 1.5);
    }

    #[test]
    fn test_command_uses_translate_task() {
        let transcriber = OpenAITranscriber::new(TranscriberConfig::default());
        let cmd = transcriber.build_command(Path::new("/tmp/a.wav"), Path::new("/tmp/out"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        let task = args.iter().position(|a| a == "--task").unwrap();
        assert_eq!(args[task + 1], "translate");
        assert!(args.contains(&"json".to_string()));
    }
}
