use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AcquisitionConfig, Config, StorageConfig};
use crate::error::{Result, SubtitlerError};
use crate::registry::TaskRegistry;
use crate::task::{MediaSource, TaskId, TaskOptions, TaskRecord, TaskState, TaskStatus};
use crate::workflow::Pipeline;

/// Source containers accepted for processing
pub const SUPPORTED_FORMATS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

pub const SUBRIP_MEDIA_TYPE: &str = "application/x-subrip";

const MIN_RESOLUTION: u32 = 144;
const MAX_RESOLUTION: u32 = 4320;

/// Language, optional four-letter script, optional region (alpha-2 or UN M.49)
static LANGUAGE_TAG: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z]{4})?(-([A-Za-z]{2}|[0-9]{3}))?$"));

/// A delivered file
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub filename: String,
}

/// Submission, status and delivery over a shared registry
#[derive(Clone)]
pub struct SubtitleService {
    registry: TaskRegistry,
    pipeline: Arc<Pipeline>,
    storage: StorageConfig,
    default_resolution: u32,
}

impl SubtitleService {
    pub fn new(pipeline: Arc<Pipeline>, storage: StorageConfig) -> Self {
        Self {
            registry: pipeline.registry().clone(),
            pipeline,
            storage,
            default_resolution: AcquisitionConfig::default().max_resolution,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = TaskRegistry::new(config.registry.clone());
        let pipeline = Arc::new(Pipeline::from_config(config, registry)?);
        Ok(Self::new(pipeline, config.storage.clone()).with_default_resolution(config.acquisition.max_resolution))
    }

    /// Resolution ceiling for submissions that do not pick one
    pub fn with_default_resolution(mut self, max_resolution: u32) -> Self {
        self.default_resolution = max_resolution;
        self
    }

    /// Options for a submission that only names its source
    pub fn default_options(&self) -> TaskOptions {
        TaskOptions {
            max_resolution: self.default_resolution,
            ..TaskOptions::default()
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn supported_formats() -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    /// Stage uploaded bytes and start processing them
    pub async fn submit_upload(&self, filename: &str, bytes: &[u8], options: TaskOptions) -> Result<TaskId> {
        let name = validate_filename(filename)?;
        validate_options(&options)?;
        if bytes.is_empty() {
            return Err(SubtitlerError::Validation("Uploaded file is empty".to_string()));
        }
        self.check_size(bytes.len() as u64)?;

        let id = TaskId::new();
        let staged = self.staged_path(&id, &name).await?;
        fs::write(&staged, bytes).await?;

        self.start(id, MediaSource::Local(staged), options).await
    }

    /// Stage a copy of a local file; the original is never touched
    pub async fn submit_file(&self, path: &Path, options: TaskOptions) -> Result<TaskId> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SubtitlerError::Validation(format!("Not a file: {}", path.display())))?;
        let name = validate_filename(&filename)?;
        validate_options(&options)?;

        let meta = fs::metadata(path)
            .await
            .map_err(|e| SubtitlerError::Validation(format!("Cannot read {}: {}", path.display(), e)))?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(SubtitlerError::Validation(format!("Not a non-empty file: {}", path.display())));
        }
        self.check_size(meta.len())?;

        let id = TaskId::new();
        let staged = self.staged_path(&id, &name).await?;
        fs::copy(path, &staged).await?;

        self.start(id, MediaSource::Local(staged), options).await
    }

    pub async fn submit_url(&self, url: &str, options: TaskOptions) -> Result<TaskId> {
        let url = validate_url(url)?;
        validate_options(&options)?;

        self.start(TaskId::new(), MediaSource::Remote(url), options).await
    }

    pub fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.registry.status(id)
    }

    /// Poll until the task reaches a terminal state
    pub async fn wait_for(&self, id: &TaskId, interval: Duration) -> Result<TaskStatus> {
        loop {
            let status = self.status(id)?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn subtitle_artifact(&self, id: &TaskId) -> Result<Artifact> {
        let record = self.completed(id)?;
        let path = record
            .artifacts
            .map(|a| a.subtitle_path)
            .ok_or_else(|| SubtitlerError::ArtifactNotFound(format!("subtitles for task {}", id)))?;

        read_artifact(&path, SUBRIP_MEDIA_TYPE).await
    }

    pub async fn video_artifact(&self, id: &TaskId) -> Result<Artifact> {
        let record = self.completed(id)?;
        let path = record
            .artifacts
            .and_then(|a| a.video_path)
            .ok_or_else(|| SubtitlerError::ArtifactNotFound(format!("embedded video for task {}", id)))?;

        let media_type = video_media_type(&path);
        read_artifact(&path, media_type).await
    }

    /// Evict expired terminal tasks and delete their files
    pub async fn sweep_expired(&self) -> usize {
        let evicted = self.registry.prune();
        let count = evicted.len();
        discard_artifacts(evicted).await;
        count
    }

    /// Run `sweep_expired` every `every` until the handle is aborted
    pub fn spawn_retention_sweep(&self, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let swept = service.sweep_expired().await;
                if swept > 0 {
                    info!("Retention sweep removed {} tasks", swept);
                }
            }
        })
    }

    fn completed(&self, id: &TaskId) -> Result<TaskRecord> {
        let record = self.registry.get(id)?;
        if record.state != TaskState::Completed {
            return Err(SubtitlerError::NotReady(*id));
        }
        Ok(record)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.storage.max_upload_bytes {
            return Err(SubtitlerError::Validation(format!(
                "File is {} bytes; the limit is {}",
                size, self.storage.max_upload_bytes
            )));
        }
        Ok(())
    }

    async fn staged_path(&self, id: &TaskId, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.storage.upload_dir).await?;
        Ok(self.storage.upload_dir.join(format!("{}_{}", id, name)))
    }

    async fn start(&self, id: TaskId, source: MediaSource, options: TaskOptions) -> Result<TaskId> {
        info!("Submitted task {} for {}", id, source.display_name());
        let evicted = self.registry.insert(TaskRecord::new(id, source, options))?;
        discard_artifacts(evicted).await;

        self.pipeline.dispatch(id);
        Ok(id)
    }
}

/// Delete files belonging to records dropped from the registry
async fn discard_artifacts(evicted: Vec<TaskRecord>) {
    for record in evicted {
        debug!("Evicted task {}", record.id);
        let mut paths: Vec<PathBuf> = record.local_path.into_iter().collect();
        if let Some(artifacts) = record.artifacts {
            paths.push(artifacts.subtitle_path);
            paths.extend(artifacts.video_path);
        }

        for path in paths {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {} of evicted task {}: {}", path.display(), record.id, e);
                }
            }
        }
    }
}

async fn read_artifact(path: &Path, media_type: &'static str) -> Result<Artifact> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match fs::read(path).await {
        Ok(bytes) => Ok(Artifact {
            bytes,
            media_type,
            filename,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SubtitlerError::ArtifactNotFound(filename)),
        Err(e) => Err(e.into()),
    }
}

/// Media type for a delivered video, keyed by container extension
pub fn video_media_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        _ => "video/mp4",
    }
}

/// Bare file name with a supported container extension
pub fn validate_filename(filename: &str) -> Result<String> {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| SubtitlerError::Validation("Missing file name".to_string()))?;

    let extension = Path::new(&name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if !SUPPORTED_FORMATS.contains(&extension.as_str()) {
        return Err(SubtitlerError::Validation(format!(
            "Unsupported file format '{}'; supported: {}",
            extension,
            SUPPORTED_FORMATS.join(", ")
        )));
    }
    Ok(name)
}

pub fn validate_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| SubtitlerError::Validation(format!("Invalid URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SubtitlerError::Validation(format!(
            "Unsupported URL scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(SubtitlerError::Validation("URL has no host".to_string()));
    }
    Ok(url.to_string())
}

pub fn validate_options(options: &TaskOptions) -> Result<()> {
    let language = LANGUAGE_TAG
        .as_ref()
        .map_err(|e| SubtitlerError::Internal(e.to_string()))?;
    if !language.is_match(&options.target_language) {
        return Err(SubtitlerError::Validation(format!(
            "Invalid target language '{}'",
            options.target_language
        )));
    }

    if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&options.max_resolution) {
        return Err(SubtitlerError::Validation(format!(
            "max_resolution must be between {} and {}",
            MIN_RESOLUTION, MAX_RESOLUTION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::testing::{FakeMedia, FakeTranscriber, Harness, no_translation};
    use crate::workflow::Stages;

    const POLL: Duration = Duration::from_millis(10);

    fn service(h: &Harness) -> SubtitleService {
        SubtitleService::new(h.pipeline.clone(), h.storage.clone())
    }

    /// Source cleanup runs just after the terminal state is recorded
    async fn assert_drained(dir: &Path) {
        for _ in 0..200 {
            if std::fs::read_dir(dir).unwrap().count() == 0 {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("{} still holds staged files", dir.display());
    }

    fn embedding() -> TaskOptions {
        TaskOptions {
            embed_subtitles: true,
            ..TaskOptions::default()
        }
    }

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("talk.MKV").unwrap(), "talk.MKV");
        assert_eq!(validate_filename("../../etc/clip.mp4").unwrap(), "clip.mp4");
        assert!(validate_filename("notes.txt").is_err());
        assert!(validate_filename("noextension").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url("ftp://example.com/v.mp4").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_validate_options() {
        assert!(validate_options(&TaskOptions::default()).is_ok());
        let with = |language: &str, resolution: u32| TaskOptions {
            target_language: language.to_string(),
            max_resolution: resolution,
            ..TaskOptions::default()
        };
        assert!(validate_options(&with("pt-BR", 720)).is_ok());
        assert!(validate_options(&with("yue", 144)).is_ok());
        assert!(validate_options(&with("English", 720)).is_err());
        assert!(validate_options(&with("es_ES", 720)).is_err());
        assert!(validate_options(&with("en-", 720)).is_err());
        assert!(validate_options(&with("de-CH-1996", 720)).is_err());
        assert!(validate_options(&with("es", 100)).is_err());
        assert!(validate_options(&with("es", 8000)).is_err());
    }

    #[test]
    fn test_language_tags_with_script_and_region() {
        for tag in ["es-419", "zh-Hans-CN", "EN", "sr-Latn", "pt-br", "zh-Hant"] {
            let options = TaskOptions {
                target_language: tag.to_string(),
                ..TaskOptions::default()
            };
            assert!(validate_options(&options).is_ok(), "{} rejected", tag);
        }
    }

    #[test]
    fn test_video_media_types() {
        assert_eq!(video_media_type(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(video_media_type(Path::new("a.MOV")), "video/quicktime");
        assert_eq!(video_media_type(Path::new("a.mp4")), "video/mp4");
        assert_eq!(video_media_type(Path::new("a")), "video/mp4");
    }

    #[tokio::test]
    async fn test_upload_is_processed_and_delivered() {
        let h = Harness::happy();
        let service = service(&h);

        let id = service
            .submit_upload("My Clip.mp4", b"video bytes", TaskOptions::default())
            .await
            .unwrap();
        let status = service.wait_for(&id, POLL).await.unwrap();
        assert_eq!(status.status, TaskState::Completed);

        let artifact = service.subtitle_artifact(&id).await.unwrap();
        assert_eq!(artifact.media_type, SUBRIP_MEDIA_TYPE);
        assert!(artifact.filename.ends_with(".srt"));
        assert!(String::from_utf8(artifact.bytes).unwrap().contains("Hello there."));

        assert_drained(&h.storage.upload_dir).await;
    }

    #[tokio::test]
    async fn test_status_never_exposes_paths() {
        let h = Harness::happy();
        let service = service(&h);

        let id = service.submit_upload("clip.mp4", b"v", embedding()).await.unwrap();
        let status = service.wait_for(&id, POLL).await.unwrap();
        let json = serde_json::to_string(&status).unwrap();

        let root = h.dir.path().to_string_lossy().to_string();
        assert!(!json.contains(&root), "{}", json);
        assert!(status.subtitle_filename.is_some());
        assert!(status.video_filename.is_some());
    }

    #[tokio::test]
    async fn test_submit_file_keeps_original() {
        let h = Harness::happy();
        let service = service(&h);
        let original = h.dir.path().join("keep.mov");
        std::fs::write(&original, b"video").unwrap();

        let id = service.submit_file(&original, TaskOptions::default()).await.unwrap();
        service.wait_for(&id, POLL).await.unwrap();

        assert_drained(&h.storage.upload_dir).await;
        assert!(original.exists());
    }

    #[tokio::test]
    async fn test_rejected_submissions_create_no_task() {
        let h = Harness::happy();
        let service = service(&h);

        assert!(matches!(
            service.submit_upload("clip.txt", b"x", TaskOptions::default()).await,
            Err(SubtitlerError::Validation(_))
        ));
        assert!(matches!(
            service.submit_upload("clip.mp4", b"", TaskOptions::default()).await,
            Err(SubtitlerError::Validation(_))
        ));
        assert!(matches!(
            service.submit_url("javascript:alert(1)", TaskOptions::default()).await,
            Err(SubtitlerError::Validation(_))
        ));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let h = Harness::happy();
        let storage = StorageConfig {
            max_upload_bytes: 4,
            ..h.storage.clone()
        };
        let service = SubtitleService::new(h.pipeline.clone(), storage);

        let err = service
            .submit_upload("clip.mp4", b"too large", TaskOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_artifact_lookup_conditions() {
        let h = Harness::happy();
        let service = service(&h);

        let unknown = TaskId::new();
        assert!(matches!(
            service.subtitle_artifact(&unknown).await,
            Err(SubtitlerError::TaskNotFound(_))
        ));

        let pending = TaskId::new();
        h.registry
            .insert(TaskRecord::new(
                pending,
                MediaSource::Remote("https://example.com/v".to_string()),
                TaskOptions::default(),
            ))
            .unwrap();
        assert!(matches!(
            service.subtitle_artifact(&pending).await,
            Err(SubtitlerError::NotReady(_))
        ));

        let id = service.submit_upload("clip.mp4", b"v", TaskOptions::default()).await.unwrap();
        service.wait_for(&id, POLL).await.unwrap();
        assert!(matches!(
            service.video_artifact(&id).await,
            Err(SubtitlerError::ArtifactNotFound(_))
        ));

        let record = h.registry.get(&id).unwrap();
        std::fs::remove_file(record.artifacts.unwrap().subtitle_path).unwrap();
        assert!(matches!(
            service.subtitle_artifact(&id).await,
            Err(SubtitlerError::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_mux_has_no_video_artifact() {
        let media = FakeMedia {
            fail_mux: true,
            ..FakeMedia::default()
        };
        let h = Harness::new(media, FakeTranscriber::default(), no_translation(), true);
        let service = service(&h);

        let id = service.submit_upload("clip.mp4", b"v", embedding()).await.unwrap();
        let status = service.wait_for(&id, POLL).await.unwrap();

        assert_eq!(status.status, TaskState::Completed);
        assert!(!service.subtitle_artifact(&id).await.unwrap().bytes.is_empty());
        assert!(matches!(
            service.video_artifact(&id).await,
            Err(SubtitlerError::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported_by_status() {
        let h = Harness::new(FakeMedia::default(), FakeTranscriber::default(), no_translation(), false);
        let service = service(&h);

        let id = service
            .submit_url("https://example.com/watch?v=1", TaskOptions::default())
            .await
            .unwrap();
        let status = service.wait_for(&id, POLL).await.unwrap();

        assert_eq!(status.status, TaskState::Error);
        assert!(status.message.contains("Download failed"));
        assert!(matches!(
            service.subtitle_artifact(&id).await,
            Err(SubtitlerError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_evicted_tasks_lose_their_artifacts() {
        let h = Harness::happy();
        let registry = TaskRegistry::new(RegistryConfig {
            retention_secs: None,
            max_tasks: 1,
        });
        let stages: Stages = h.pipeline.stages().clone();
        let pipeline = Arc::new(Pipeline::new(registry.clone(), stages, h.storage.clone(), 0));
        let service = SubtitleService::new(pipeline, h.storage.clone());

        let first = service.submit_upload("a.mp4", b"v", TaskOptions::default()).await.unwrap();
        service.wait_for(&first, POLL).await.unwrap();
        let first_srt = registry.get(&first).unwrap().artifacts.unwrap().subtitle_path;
        assert!(first_srt.exists());

        let second = service.submit_upload("b.mp4", b"v", TaskOptions::default()).await.unwrap();
        service.wait_for(&second, POLL).await.unwrap();

        assert!(matches!(service.status(&first), Err(SubtitlerError::TaskNotFound(_))));
        assert!(!first_srt.exists());
    }

    #[tokio::test]
    async fn test_default_resolution_reaches_the_download() {
        let h = Harness::happy();
        let service = service(&h).with_default_resolution(480);

        let id = service
            .submit_url("https://example.com/watch?v=1", service.default_options())
            .await
            .unwrap();
        let status = service.wait_for(&id, POLL).await.unwrap();

        assert_eq!(status.status, TaskState::Completed);
        assert_eq!(status.max_resolution, 480);
        assert_eq!(*h.acquirer.seen_resolutions.lock().unwrap(), vec![480]);
    }

    fn expiring(h: &Harness) -> (TaskRegistry, SubtitleService) {
        let registry = TaskRegistry::new(RegistryConfig {
            retention_secs: Some(0),
            max_tasks: 10,
        });
        let stages: Stages = h.pipeline.stages().clone();
        let pipeline = Arc::new(Pipeline::new(registry.clone(), stages, h.storage.clone(), 0));
        (registry, SubtitleService::new(pipeline, h.storage.clone()))
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_tasks_and_files() {
        let h = Harness::happy();
        let (registry, service) = expiring(&h);

        let id = service.submit_upload("a.mp4", b"v", TaskOptions::default()).await.unwrap();
        service.wait_for(&id, POLL).await.unwrap();
        assert_drained(&h.storage.upload_dir).await;
        let srt = registry.get(&id).unwrap().artifacts.unwrap().subtitle_path;
        assert!(srt.exists());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(service.sweep_expired().await, 1);
        assert!(matches!(service.status(&id), Err(SubtitlerError::TaskNotFound(_))));
        assert!(!srt.exists());
        assert_eq!(service.sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn test_retention_sweep_runs_in_background() {
        let h = Harness::happy();
        let (registry, service) = expiring(&h);

        let id = service.submit_upload("a.mp4", b"v", TaskOptions::default()).await.unwrap();
        service.wait_for(&id, POLL).await.unwrap();
        assert_drained(&h.storage.upload_dir).await;
        let srt = registry.get(&id).unwrap().artifacts.unwrap().subtitle_path;

        let sweeper = service.spawn_retention_sweep(POLL);
        for _ in 0..200 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(POLL).await;
        }
        sweeper.abort();

        assert!(registry.is_empty());
        assert!(!srt.exists());
    }
}
