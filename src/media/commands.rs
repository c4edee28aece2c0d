use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SubtitlerError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Copy both video and audio streams without re-encoding
    pub fn copy_streams(self) -> Self {
        self.arg("-c:v").arg("copy").arg("-c:a").arg("copy")
    }

    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Tag the first subtitle stream with a language code
    pub fn subtitle_language(self, language: &str) -> Self {
        self.arg("-metadata:s:s:0").arg(format!("language={}", language))
    }

    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Execute the command and return its stdout
    pub async fn execute(&self) -> Result<Vec<u8>> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubtitlerError::Media(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubtitlerError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr_tail(&stderr, 5)
            )));
        }

        Ok(output.stdout)
    }
}

/// Last `lines` non-empty lines of a tool's stderr; ffmpeg prints its banner first
fn stderr_tail(stderr: &str, lines: usize) -> String {
    let kept: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    kept[kept.len().saturating_sub(lines)..].join("\n")
}

/// Container and subtitle codec pair used for a soft-subtitle mux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxStrategy {
    pub container: &'static str,
    pub subtitle_codec: &'static str,
}

impl MuxStrategy {
    /// Native subtitle codec for the source container; mkv when it has none
    pub fn primary_for(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "mp4" => Self::with("mp4", "mov_text"),
            "mov" => Self::with("mov", "mov_text"),
            "m4v" => Self::with("m4v", "mov_text"),
            "webm" => Self::with("webm", "webvtt"),
            _ => Self::with("mkv", "srt"),
        }
    }

    /// Strategy tried once after the primary fails
    pub fn alternate(self) -> Self {
        if self.container == "mkv" {
            Self::with("mp4", "mov_text")
        } else {
            Self::with("mkv", "srt")
        }
    }

    fn with(container: &'static str, subtitle_codec: &'static str) -> Self {
        Self {
            container,
            subtitle_codec,
        }
    }
}

/// Builder for the media operations the pipeline runs
pub struct MediaCommandBuilder {
    binary_path: String,
    probe_binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, probe_binary_path: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_binary_path: probe_binary_path.into(),
        }
    }

    /// Mono 16-bit PCM WAV for the transcriber
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P, sample_rate: u32) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio extraction")
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(sample_rate)
            .audio_channels(1)
            .overwrite()
            .output(audio_path)
    }

    /// ffprobe query for the container duration as JSON
    pub fn probe_duration<P: AsRef<Path>>(&self, media_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_binary_path, "Duration probe")
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .output(media_path)
    }

    /// Add the subtitle file as an extra track; video and audio are copied
    pub fn embed_soft_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        strategy: MuxStrategy,
        language: &str,
    ) -> MediaCommand {
        MediaCommand::new(
            &self.binary_path,
            format!("Subtitle muxing ({} into {})", strategy.subtitle_codec, strategy.container),
        )
        .overwrite()
        .input(video_path)
        .input(subtitle_path)
        .map("0:v?")
        .map("0:a?")
        .map("1:0")
        .copy_streams()
        .subtitle_codec(strategy.subtitle_codec)
        .subtitle_language(language)
        .output(output_path)
    }

    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }

    pub fn probe_version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.probe_binary_path, "Probe version check").arg("-version")
    }
}
