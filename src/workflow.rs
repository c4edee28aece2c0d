use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acquire::{
    DownloadProgress, MediaAcquirer, ProgressSink, RetryController, TransferOptions, YtDlpWorker,
    sanitize_name, sweep_partial_downloads,
};
use crate::config::{Config, StorageConfig};
use crate::error::{Result, SubtitlerError};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait, MuxRequest};
use crate::registry::TaskRegistry;
use crate::subtitle::{format_srt, write_srt};
use crate::task::{Artifacts, MediaSource, TaskId, TaskRecord, TaskState};
use crate::transcribe::{TranscriberFactory, TranscriberTrait};
use crate::translate::{SubtitleTranslator, TranslationBackend, TranslatorFactory, is_working_language, language_code_to_name};

/// The stage implementations a pipeline composes
#[derive(Clone)]
pub struct Stages {
    pub acquirer: Arc<dyn MediaAcquirer>,
    pub media: Arc<dyn MediaProcessorTrait>,
    pub transcriber: Arc<dyn TranscriberTrait>,
    pub translation: Arc<dyn TranslationBackend>,
}

impl Stages {
    pub fn from_config(config: &Config) -> Result<Self> {
        let worker = Arc::new(YtDlpWorker::new(config.acquisition.clone()));

        Ok(Self {
            acquirer: Arc::new(RetryController::new(worker, &config.acquisition)),
            media: MediaProcessorFactory::create_processor(config.media.clone()),
            transcriber: TranscriberFactory::create_transcriber(config.transcriber.clone()),
            translation: TranslatorFactory::create_backend(config.translate.clone())?,
        })
    }
}

/// What a successful run delivers
#[derive(Debug)]
struct Completion {
    artifacts: Artifacts,
    warnings: Vec<String>,
}

impl Completion {
    fn message(&self) -> String {
        let base = if self.artifacts.video_path.is_some() {
            "Subtitles and video with embedded subtitles generated successfully"
        } else {
            "Subtitles generated successfully"
        };

        if self.warnings.is_empty() {
            base.to_string()
        } else {
            format!("{} ({})", base, self.warnings.join("; "))
        }
    }
}

/// Removes a scratch file when the pipeline body ends, however it ends
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed temporary file {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary file {}: {}", self.0.display(), e),
        }
    }
}

/// Drives a task from its source to a delivered subtitle file
pub struct Pipeline {
    registry: TaskRegistry,
    stages: Stages,
    translator: SubtitleTranslator,
    storage: StorageConfig,
    rate_limit: u64,
}

impl Pipeline {
    pub fn new(registry: TaskRegistry, stages: Stages, storage: StorageConfig, rate_limit: u64) -> Self {
        let translator = SubtitleTranslator::new(stages.translation.clone());
        Self {
            registry,
            stages,
            translator,
            storage,
            rate_limit,
        }
    }

    pub fn from_config(config: &Config, registry: TaskRegistry) -> Result<Self> {
        Ok(Self::new(
            registry,
            Stages::from_config(config)?,
            config.storage.clone(),
            config.acquisition.rate_limit,
        ))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Run the task in the background; the handle resolves once it is terminal
    pub fn dispatch(self: &Arc<Self>, id: TaskId) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(id).await })
    }

    /// Run the task to a terminal state, then remove its source media
    pub async fn run(self: Arc<Self>, id: TaskId) {
        let body = tokio::spawn({
            let pipeline = Arc::clone(&self);
            async move { pipeline.execute(id).await }
        });

        let result = match body.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(SubtitlerError::Internal(format!("pipeline panicked: {}", reason)))
            }
            Err(_) => Err(SubtitlerError::Internal("pipeline task was cancelled".to_string())),
        };

        self.finish(id, result);
        self.cleanup_source(id).await;
    }

    async fn execute(&self, id: TaskId) -> Result<Completion> {
        let record = self.registry.get(&id)?;
        let options = record.options.clone();
        info!("Processing task {} from {}", id, record.source.display_name());

        let video_path = self.materialize(&record).await?;

        self.registry.update_progress(&id, 25, "Extracting audio")?;
        let work_dir = self.storage.work_dir();
        fs::create_dir_all(&work_dir).await?;
        let audio_path = work_dir.join(format!("{}_audio.wav", id));
        let _audio_guard = TempFileGuard(audio_path.clone());
        let audio = self.stages.media.extract_audio(&video_path, &audio_path).await?;

        self.registry
            .update_progress(&id, 40, format!("Transcribing {:.0}s of audio", audio.duration))?;
        let transcription = self.stages.transcriber.transcribe(&audio.path).await?;

        self.registry.update_progress(&id, 60, "Generating subtitles")?;
        let mut srt = format_srt(&transcription.segments);
        let mut warnings = Vec::new();
        if srt.is_empty() {
            warnings.push("No speech detected; the subtitle file is empty".to_string());
        }

        if !is_working_language(&options.target_language) {
            self.registry.update_progress(
                &id,
                70,
                format!("Translating subtitles to {}", language_code_to_name(&options.target_language)),
            )?;
            let outcome = self.translator.translate_srt(&srt, &options.target_language).await;
            if let Some(warning) = outcome.warning() {
                warnings.push(warning);
            }
            srt = outcome.text;
        }

        self.registry.update_progress(&id, 85, "Saving subtitles")?;
        let stem = artifact_stem(&video_path, &id);
        let subtitle_path = self.storage.output_dir.join(format!("{}.srt", stem));
        write_srt(&srt, &subtitle_path).await?;

        let mut embedded = None;
        if options.embed_subtitles {
            if options.audio_only {
                warnings.push("Subtitle embedding skipped for audio-only source".to_string());
            } else {
                self.registry.update_progress(&id, 90, "Embedding subtitles into video")?;
                let request = MuxRequest {
                    video_path: &video_path,
                    subtitle_path: &subtitle_path,
                    output_dir: &self.storage.output_dir,
                    output_stem: &stem,
                    language: &options.target_language,
                };
                match self.stages.media.embed_soft_subtitles(request).await {
                    Ok(path) => embedded = Some(path),
                    Err(e) => {
                        warn!(kind = ?e.kind(), "Subtitle embedding failed for task {}: {}", id, e);
                        warnings.push(format!("Subtitle embedding failed: {}", e));
                    }
                }
            }
        }

        Ok(Completion {
            artifacts: Artifacts {
                subtitle_path,
                video_path: embedded,
            },
            warnings,
        })
    }

    /// Produce a local media path for the task
    async fn materialize(&self, record: &TaskRecord) -> Result<PathBuf> {
        let id = record.id;
        let url = match &record.source {
            MediaSource::Local(path) => {
                self.registry
                    .transition(&id, TaskState::Processing, 5, "Processing uploaded file")?;
                return Ok(path.clone());
            }
            MediaSource::Remote(url) => url,
        };

        self.registry
            .transition(&id, TaskState::Downloading, 5, "Downloading video")?;
        fs::create_dir_all(&self.storage.download_dir).await?;

        let prefix = format!("{}_", id);
        let transfer = TransferOptions {
            max_resolution: record.options.max_resolution,
            audio_only: record.options.audio_only,
            rate_limit: self.rate_limit,
            output_dir: self.storage.download_dir.clone(),
            file_prefix: prefix.clone(),
        };

        let registry = self.registry.clone();
        let sink: ProgressSink = Arc::new(move |progress: DownloadProgress| {
            let fraction = progress.fraction();
            let _ = registry.update_progress(
                &id,
                5 + (fraction * 15.0) as u8,
                format!("Downloading: {:.0}%", fraction * 100.0),
            );
        });

        match self.stages.acquirer.acquire(url, &transfer, Some(sink)).await {
            Ok(media) => {
                self.registry.set_local_path(&id, media.path.clone())?;
                self.registry.set_title(&id, media.title.clone())?;
                self.registry.transition(
                    &id,
                    TaskState::Processing,
                    20,
                    format!("Download complete: {}", media.title),
                )?;
                Ok(media.path)
            }
            Err(e) => {
                let dir = self.storage.download_dir.clone();
                let removed = tokio::task::spawn_blocking(move || sweep_partial_downloads(&dir, &prefix))
                    .await
                    .unwrap_or(0);
                if removed > 0 {
                    info!("Removed {} partial download(s) for task {}", removed, id);
                }
                Err(e)
            }
        }
    }

    fn finish(&self, id: TaskId, result: Result<Completion>) {
        let outcome = match result {
            Ok(completion) => {
                let message = completion.message();
                info!("Task {} completed: {}", id, message);
                self.registry
                    .complete(&id, completion.artifacts, completion.warnings, message)
            }
            Err(e) => {
                error!(kind = ?e.kind(), "Task {} failed: {}", id, e);
                self.registry.fail(&id, format!("Processing failed: {}", e))
            }
        };

        if let Err(e) = outcome {
            error!("Could not record final state of task {}: {}", id, e);
        }
    }

    async fn cleanup_source(&self, id: TaskId) {
        let path = match self.registry.take_local_path(&id) {
            Ok(Some(path)) => path,
            Ok(None) => return,
            Err(e) => {
                warn!("Skipping source cleanup for task {}: {}", id, e);
                return;
            }
        };

        match fs::remove_file(&path).await {
            Ok(()) => debug!("Removed source media {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove source media {}: {}", path.display(), e),
        }
    }
}

/// Base name for delivered files: the source stem without the task prefix, plus a short id
fn artifact_stem(video_path: &Path, id: &TaskId) -> String {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let prefix = format!("{}_", id);
    let stem = sanitize_name(stem.strip_prefix(&prefix).unwrap_or(&stem));
    let stem = if stem.is_empty() { "subtitles".to_string() } else { stem };

    format!("{}_{}", stem, id.short())
}
