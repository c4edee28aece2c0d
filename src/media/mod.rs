// Modular media processing architecture
//
// - Processor: ffmpeg/ffprobe-backed implementation of the trait below
// - Commands: command builders and mux strategies

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Audio extracted for transcription
#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub path: PathBuf,
    /// Duration of the source media in seconds
    pub duration: f64,
}

/// Inputs for a soft-subtitle mux
#[derive(Debug, Clone, Copy)]
pub struct MuxRequest<'a> {
    pub video_path: &'a Path,
    pub subtitle_path: &'a Path,
    pub output_dir: &'a Path,
    /// Output is written as `{output_stem}_with_subtitles.{container}`
    pub output_stem: &'a str,
    pub language: &'a str,
}

/// Main trait for media processing operations
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Extract mono PCM audio from a video into `audio_path`
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<ExtractedAudio>;

    /// Container duration in seconds; zero when the probe reports nothing usable
    async fn probe_duration(&self, media_path: &Path) -> Result<f64>;

    /// Mux the subtitle file into a copy of the video as a toggleable track
    async fn embed_soft_subtitles(&self, request: MuxRequest<'_>) -> Result<PathBuf>;

    /// Check that ffmpeg and ffprobe can be executed
    async fn check_availability(&self) -> Result<()>;

    /// First line of `ffmpeg -version`
    async fn get_version_info(&self) -> Result<String>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Arc<dyn MediaProcessorTrait> {
        Arc::new(processor::MediaProcessorImpl::new(config))
    }
}
