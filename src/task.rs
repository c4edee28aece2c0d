use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SubtitlerError;

/// Opaque task identifier, minted once per submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used to keep file names unique but short
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = SubtitlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| SubtitlerError::Validation(format!("Invalid task id '{}': {}", s, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Legal edges of `queued → (downloading →)? processing → {completed | error}`
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Processing)
                | (Queued, Error)
                | (Downloading, Processing)
                | (Downloading, Error)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Where a task's media comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A file already staged on local storage
    Local(PathBuf),
    /// A remote URL that must be acquired first
    Remote(String),
}

impl MediaSource {
    /// Caller-facing description that never reveals a directory
    pub fn display_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            Self::Remote(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub target_language: String,
    pub embed_subtitles: bool,
    pub audio_only: bool,
    pub max_resolution: u32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            target_language: crate::WORKING_LANGUAGE.to_string(),
            embed_subtitles: false,
            audio_only: false,
            max_resolution: 1080,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub subtitle_path: PathBuf,
    pub video_path: Option<PathBuf>,
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().to_string())
}

/// Mutable status record for one task
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub state: TaskState,
    pub progress: u8,
    pub message: String,
    pub source: MediaSource,
    pub options: TaskOptions,
    pub artifacts: Option<Artifacts>,
    pub title: Option<String>,
    pub warnings: Vec<String>,
    /// Materialized media on local storage; removed once the task is terminal
    pub local_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, source: MediaSource, options: TaskOptions) -> Self {
        let local_path = match &source {
            MediaSource::Local(path) => Some(path.clone()),
            MediaSource::Remote(_) => None,
        };

        Self {
            id,
            state: TaskState::Queued,
            progress: 0,
            message: "Task queued".to_string(),
            source,
            options,
            artifacts: None,
            title: None,
            warnings: Vec::new(),
            local_path,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Seconds since submission, frozen once the task is terminal
    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn status(&self) -> TaskStatus {
        let artifacts = self.artifacts.as_ref();
        TaskStatus {
            task_id: self.id,
            status: self.state,
            progress: self.progress,
            message: self.message.clone(),
            source: self.source.display_name(),
            title: self.title.clone(),
            target_language: self.options.target_language.clone(),
            embed_subtitles: self.options.embed_subtitles,
            audio_only: self.options.audio_only,
            max_resolution: self.options.max_resolution,
            subtitle_filename: artifacts.and_then(|a| file_name_of(&a.subtitle_path)),
            video_filename: artifacts.and_then(|a| a.video_path.as_deref()).and_then(file_name_of),
            warnings: self.warnings.clone(),
            created_at: self.created_at,
            processing_time: self.elapsed_secs(),
        }
    }
}

/// Poller-facing view of a task; carries file names but never paths
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub status: TaskState,
    pub progress: u8,
    pub message: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub target_language: String,
    pub embed_subtitles: bool,
    pub audio_only: bool,
    pub max_resolution: u32,
    /// Zero bytes long when no speech was detected; a warning says so
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_filename: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use TaskState::*;
        assert!(Queued.can_transition_to(Downloading));
        assert!(Queued.can_transition_to(Processing));
        assert!(Downloading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Error));

        assert!(!Completed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Downloading));
        assert!(!Downloading.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn test_status_hides_paths() {
        let id = TaskId::new();
        let source = MediaSource::Local(PathBuf::from("/srv/uploads/abc_clip.mp4"));
        let mut record = TaskRecord::new(id, source, TaskOptions::default());
        record.artifacts = Some(Artifacts {
            subtitle_path: PathBuf::from("/srv/outputs/clip_1234abcd.srt"),
            video_path: Some(PathBuf::from("/srv/outputs/clip_with_subtitles.mp4")),
        });

        let json = serde_json::to_string(&record.status()).unwrap();
        assert!(!json.contains("/srv"));
        assert!(json.contains("clip_1234abcd.srt"));
        assert!(json.contains("clip_with_subtitles.mp4"));
        assert!(json.contains("\"status\":\"queued\""));
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }
}
