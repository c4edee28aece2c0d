// Modular transcription architecture
//
// This module provides different transcription implementations through a factory pattern:
// - OpenAI: OpenAI Whisper command-line tool
// - WhisperCpp: whisper.cpp `whisper-cli`
//
// Both run Whisper's `translate` task, so every transcription comes back in the
// working language regardless of what was spoken.

pub mod common;
pub mod openai;
pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use common::*;
use crate::config::{TranscriberConfig, TranscriberImplementation};
use crate::error::Result;

/// Main trait for transcription operations
#[async_trait]
pub trait TranscriberTrait: Send + Sync {
    /// Transcribe audio into timed segments in the working language
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription>;

    /// Check if the transcriber binary can be executed
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    /// Create a transcriber based on the configured implementation
    pub fn create_transcriber(config: TranscriberConfig) -> Arc<dyn TranscriberTrait> {
        match config.implementation {
            TranscriberImplementation::OpenAI => Arc::new(openai::OpenAITranscriber::new(config)),
            TranscriberImplementation::WhisperCpp => Arc::new(whisper_cpp::WhisperCppTranscriber::new(config)),
        }
    }
}
