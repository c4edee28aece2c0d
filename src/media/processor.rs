use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ExtractedAudio, MediaCommandBuilder, MediaProcessorTrait, MuxRequest, MuxStrategy};
use crate::config::MediaConfig;
use crate::error::{Result, SubtitlerError};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path, &config.probe_binary_path);

        Self {
            config,
            command_builder,
        }
    }

    async fn run_mux(&self, request: &MuxRequest<'_>, strategy: MuxStrategy) -> Result<PathBuf> {
        let output_path = request
            .output_dir
            .join(format!("{}_with_subtitles.{}", request.output_stem, strategy.container));

        let command = self.command_builder.embed_soft_subtitles(
            request.video_path,
            request.subtitle_path,
            &output_path,
            strategy,
            request.language,
        );

        match command.execute().await {
            Ok(_) => Ok(output_path),
            Err(e) => {
                remove_partial(&output_path).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<ExtractedAudio> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        if let Some(parent) = audio_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.command_builder
            .extract_audio(video_path, audio_path, self.config.sample_rate)
            .execute()
            .await?;

        let size = tokio::fs::metadata(audio_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SubtitlerError::Media(format!(
                "No usable audio stream in {}",
                video_path.display()
            )));
        }

        let duration = match self.probe_duration(video_path).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Could not probe duration of {}: {}", video_path.display(), e);
                0.0
            }
        };

        info!("Audio extraction completed ({:.1}s of media)", duration);
        Ok(ExtractedAudio {
            path: audio_path.to_path_buf(),
            duration,
        })
    }

    async fn probe_duration(&self, media_path: &Path) -> Result<f64> {
        let stdout = self.command_builder.probe_duration(media_path).execute().await?;
        let probe: Value = serde_json::from_slice(&stdout)?;
        Ok(duration_from_probe(&probe))
    }

    async fn embed_soft_subtitles(&self, request: MuxRequest<'_>) -> Result<PathBuf> {
        info!(
            "Embedding subtitles from {} into {}",
            request.subtitle_path.display(),
            request.video_path.display()
        );
        tokio::fs::create_dir_all(request.output_dir).await?;

        let extension = request
            .video_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let primary = MuxStrategy::primary_for(&extension);

        let primary_error = match self.run_mux(&request, primary).await {
            Ok(path) => {
                info!("Subtitle embedding completed: {}", path.display());
                return Ok(path);
            }
            Err(e) => e,
        };

        let alternate = primary.alternate();
        warn!(
            "Muxing {} into {} failed, retrying as {} into {}: {}",
            primary.subtitle_codec, primary.container, alternate.subtitle_codec, alternate.container, primary_error
        );

        match self.run_mux(&request, alternate).await {
            Ok(path) => {
                info!("Subtitle embedding completed with alternate strategy: {}", path.display());
                Ok(path)
            }
            Err(alternate_error) => Err(SubtitlerError::Media(format!(
                "Subtitle muxing failed: {}; alternate: {}",
                primary_error, alternate_error
            ))),
        }
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await?;
        self.command_builder.probe_version_check().execute().await?;
        info!("Media processor is available");
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");
        let stdout = self.command_builder.version_check().execute().await?;
        let version_info = String::from_utf8_lossy(&stdout);
        Ok(version_info.lines().next().unwrap_or("Unknown version").to_string())
    }
}

/// `format.duration` from ffprobe JSON; ffprobe reports it as a string
fn duration_from_probe(probe: &Value) -> f64 {
    let raw = &probe["format"]["duration"];
    let value = match raw {
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        other => other.as_f64().unwrap_or(0.0),
    };
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}
