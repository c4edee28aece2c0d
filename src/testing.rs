// Stand-in stages for pipeline and service tests

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

use crate::acquire::{AcquiredMedia, DownloadProgress, MediaAcquirer, ProgressSink, TransferOptions};
use crate::config::StorageConfig;
use crate::error::{Result, SubtitlerError};
use crate::media::{ExtractedAudio, MediaProcessorTrait, MuxRequest};
use crate::registry::TaskRegistry;
use crate::task::{TaskId, TaskState};
use crate::transcribe::{Transcription, TranscriberTrait, TranscriptionSegment};
use crate::translate::MockTranslationBackend;
use crate::workflow::{Pipeline, Stages};

#[derive(Default)]
pub struct FakeMedia {
    pub fail_extract: bool,
    pub fail_mux: bool,
}

#[async_trait]
impl MediaProcessorTrait for FakeMedia {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<ExtractedAudio> {
        if self.fail_extract {
            return Err(SubtitlerError::Media(format!("no audio in {}", video_path.display())));
        }
        fs::write(audio_path, b"RIFF").await?;
        Ok(ExtractedAudio {
            path: audio_path.to_path_buf(),
            duration: 3.0,
        })
    }

    async fn probe_duration(&self, _media_path: &Path) -> Result<f64> {
        Ok(3.0)
    }

    async fn embed_soft_subtitles(&self, request: MuxRequest<'_>) -> Result<PathBuf> {
        if self.fail_mux {
            return Err(SubtitlerError::Media("muxer exploded".to_string()));
        }
        let path = request
            .output_dir
            .join(format!("{}_with_subtitles.mp4", request.output_stem));
        fs::write(&path, b"video").await?;
        Ok(path)
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        Ok("fake".to_string())
    }
}

#[derive(Default)]
pub struct FakeTranscriber {
    pub panic: bool,
    /// Return no segments
    pub silent: bool,
}

#[async_trait]
impl TranscriberTrait for FakeTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription> {
        assert!(audio_path.exists());
        if self.panic {
            panic!("model weights missing");
        }
        if self.silent {
            return Ok(Transcription {
                text: String::new(),
                segments: Vec::new(),
                detected_language: None,
            });
        }
        Ok(Transcription {
            text: "Hello there.".to_string(),
            segments: vec![TranscriptionSegment {
                start: 0.0,
                end: 1.5,
                text: "Hello there.".to_string(),
            }],
            detected_language: Some("fr".to_string()),
        })
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes a prefixed file into the download directory, then succeeds or fails
pub struct FakeAcquirer {
    pub succeed: bool,
    pub registry: TaskRegistry,
    /// Task state observed while the download ran
    pub seen_states: Mutex<Vec<TaskState>>,
    /// Resolution ceiling each download was asked for
    pub seen_resolutions: Mutex<Vec<u32>>,
}

#[async_trait]
impl MediaAcquirer for FakeAcquirer {
    async fn acquire(
        &self,
        _locator: &str,
        options: &TransferOptions,
        progress: Option<ProgressSink>,
    ) -> Result<AcquiredMedia> {
        let id: TaskId = options.file_prefix.trim_end_matches('_').parse()?;
        self.seen_states.lock().unwrap().push(self.registry.get(&id)?.state);
        self.seen_resolutions.lock().unwrap().push(options.max_resolution);

        if let Some(sink) = progress {
            sink(DownloadProgress {
                downloaded_bytes: 1.0,
                total_bytes: 2.0,
                ..DownloadProgress::default()
            });
        }

        if self.succeed {
            let path = options.output_dir.join(format!("{}My_Talk.mp4", options.file_prefix));
            fs::write(&path, b"video").await?;
            Ok(AcquiredMedia {
                path,
                title: "My Talk".to_string(),
            })
        } else {
            let partial = options.output_dir.join(format!("{}My_Talk.mp4.part", options.file_prefix));
            fs::write(partial, b"x").await?;
            Err(SubtitlerError::Acquisition {
                attempts: 3,
                reason: "timed out after 1800s".to_string(),
            })
        }
    }
}

pub fn no_translation() -> MockTranslationBackend {
    let mut mock = MockTranslationBackend::new();
    mock.expect_translate().never();
    mock
}

/// Pipeline rooted in a temporary directory
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub storage: StorageConfig,
    pub registry: TaskRegistry,
    pub pipeline: Arc<Pipeline>,
    pub acquirer: Arc<FakeAcquirer>,
}

impl Harness {
    pub fn new(
        media: FakeMedia,
        transcriber: FakeTranscriber,
        translation: MockTranslationBackend,
        download_ok: bool,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::default();
        let acquirer = Arc::new(FakeAcquirer {
            succeed: download_ok,
            registry: registry.clone(),
            seen_states: Mutex::new(Vec::new()),
            seen_resolutions: Mutex::new(Vec::new()),
        });
        let stages = Stages {
            acquirer: acquirer.clone(),
            media: Arc::new(media),
            transcriber: Arc::new(transcriber),
            translation: Arc::new(translation),
        };
        let storage = StorageConfig::rooted_at(dir.path());
        let pipeline = Arc::new(Pipeline::new(registry.clone(), stages, storage.clone(), 0));

        Self {
            dir,
            storage,
            registry,
            pipeline,
            acquirer,
        }
    }

    pub fn happy() -> Self {
        Self::new(FakeMedia::default(), FakeTranscriber::default(), no_translation(), true)
    }
}
