use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SubtitlerError};

// Defaults shared between `Default` impls and serde
fn default_socket_timeout_secs() -> u64 {
    30
}

fn default_http_chunk_size() -> String {
    "10M".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_upload_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Path to the yt-dlp binary
    pub binary_path: String,
    /// Number of download attempts before giving up
    pub max_retries: u32,
    /// Hard ceiling for a single attempt, in milliseconds
    pub per_attempt_timeout_ms: u64,
    /// Delay before the second attempt; doubles after every failure
    pub initial_backoff_ms: u64,
    /// Download rate limit in bytes per second; 0 means unlimited
    pub rate_limit: u64,
    /// Resolution ceiling used when a submission does not specify one
    pub max_resolution: u32,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_http_chunk_size")]
    pub http_chunk_size: String,
}

impl AcquisitionConfig {
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            max_retries: 3,
            per_attempt_timeout_ms: 1_800_000,
            initial_backoff_ms: 2_000,
            rate_limit: 1_048_576,
            max_resolution: 1080,
            socket_timeout_secs: default_socket_timeout_secs(),
            http_chunk_size: default_http_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Which transcriber backend to run
    pub implementation: TranscriberImplementation,
    /// Path to the transcriber binary (`whisper` or `whisper-cli`)
    pub binary_path: String,
    /// Model name for OpenAI Whisper, or a ggml model path for whisper.cpp
    pub model: String,
    /// Extra arguments passed through verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriberImplementation {
    /// OpenAI Whisper command-line tool
    OpenAI,
    /// whisper.cpp `whisper-cli`
    WhisperCpp,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            implementation: TranscriberImplementation::OpenAI,
            binary_path: "whisper".to_string(),
            model: "base".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Translation backend
    pub provider: TranslationProvider,
    /// Base URL of the backend API; the provider's own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Model used for translation; the provider's own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// API key; falls back to the environment variable named by `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_completion_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationProvider {
    /// OpenAI chat completions
    OpenAI,
    /// Local Ollama server
    Ollama,
}

impl TranslationProvider {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Ollama => "llama3.2:3b",
        }
    }
}

impl TranslateConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or_else(|| self.provider.default_endpoint())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.provider.default_model())
    }

    /// Resolve the API key from config or environment, ignoring placeholders
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != "your-api-key-here")
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::OpenAI,
            endpoint: None,
            model: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: 60,
            temperature: 0.1,
            max_completion_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_binary_path: String,
    /// Sample rate of the extracted audio
    pub sample_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_binary_path: "ffprobe".to_string(),
            sample_rate: 16_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Staged uploads, one `{task_id}_{filename}` per task
    pub upload_dir: PathBuf,
    /// Remote downloads, one `{task_id}_...` file per task
    pub download_dir: PathBuf,
    /// Delivered subtitle and video artifacts
    pub output_dir: PathBuf,
    /// Scratch space for extracted audio; system temp dir when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl StorageConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Root every directory under `base`
    pub fn rooted_at<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            upload_dir: base.join("uploads"),
            download_dir: base.join("downloads"),
            output_dir: base.join("outputs"),
            work_dir: Some(base.join("work")),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            download_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("outputs"),
            work_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Terminal tasks older than this are evicted; `None` keeps them forever
    pub retention_secs: Option<u64>,
    /// Upper bound on stored records; only terminal records are evicted to meet it
    pub max_tasks: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention_secs: Some(24 * 60 * 60),
            max_tasks: 1000,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubtitlerError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubtitlerError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubtitlerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubtitlerError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
