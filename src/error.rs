use thiserror::Error;

use crate::task::TaskId;

#[derive(Error, Debug)]
pub enum SubtitlerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Download failed after {attempts} attempt(s): {reason}")]
    Acquisition { attempts: u32, reason: String },

    #[error("Transcription error: {0}")]
    Transcriber(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Subtitle format error: {0}")]
    Subtitle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {0} has not completed yet")]
    NotReady(TaskId),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used when deciding how a failure surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected synchronously, before a task exists
    Validation,
    /// Remote fetch exhausted its attempts
    Acquisition,
    /// Fatal stage failure; the task moves to `error`
    Transform,
    /// Absorbed by the pipeline; only visible as a warning
    Degraded,
    /// Lookup against the registry or delivered artifacts
    Lookup,
    Internal,
}

impl SubtitlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Toml(_) => ErrorKind::Validation,
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::Io(_) | Self::Json(_) | Self::Media(_) | Self::Transcriber(_) | Self::Subtitle(_) => {
                ErrorKind::Transform
            }
            Self::Translation(_) | Self::Http(_) => ErrorKind::Degraded,
            Self::TaskNotFound(_) | Self::NotReady(_) | Self::ArtifactNotFound(_) => ErrorKind::Lookup,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubtitlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = SubtitlerError::Acquisition { attempts: 3, reason: "timeout".to_string() };
        assert_eq!(err.kind(), ErrorKind::Acquisition);
        assert_eq!(err.to_string(), "Download failed after 3 attempt(s): timeout");

        assert_eq!(SubtitlerError::Media("x".into()).kind(), ErrorKind::Transform);
        assert_eq!(SubtitlerError::Translation("x".into()).kind(), ErrorKind::Degraded);
        assert_eq!(SubtitlerError::Validation("x".into()).kind(), ErrorKind::Validation);
    }
}
