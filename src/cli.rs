use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::task::TaskOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that create a task
#[derive(ClapArgs, Debug, Clone)]
pub struct SubtitleOptions {
    /// Target subtitle language (e.g. es, pt-BR)
    #[arg(short = 'l', long, default_value = crate::WORKING_LANGUAGE)]
    pub target_lang: String,

    /// Also produce a copy of the video with a soft subtitle track
    #[arg(long)]
    pub embed: bool,

    /// Download only the audio of a remote source
    #[arg(long)]
    pub audio_only: bool,

    /// Highest video height to download [default: acquisition.max_resolution]
    #[arg(long)]
    pub max_resolution: Option<u32>,
}

impl SubtitleOptions {
    pub fn to_task_options(&self, default_resolution: u32) -> TaskOptions {
        TaskOptions {
            target_language: self.target_lang.clone(),
            embed_subtitles: self.embed,
            audio_only: self.audio_only,
            max_resolution: self.max_resolution.unwrap_or(default_resolution),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate subtitles for a local video file or a video URL
    Process {
        /// Local video file or http(s) URL
        input: String,

        #[command(flatten)]
        options: SubtitleOptions,

        /// Output directory for generated files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Seconds between status polls
        #[arg(long, default_value_t = 1)]
        poll_secs: u64,
    },

    /// Download a remote video without processing it
    Download {
        /// Video URL
        url: String,

        /// Output directory
        #[arg(short, long, default_value = "downloads")]
        output_dir: PathBuf,

        /// Download only the audio track
        #[arg(long)]
        audio_only: bool,

        /// Highest video height to download
        #[arg(long)]
        max_resolution: Option<u32>,
    },

    /// Extract audio from video file
    Extract {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output audio file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Transcribe audio to an SRT file
    Transcribe {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Translate an SRT file
    Translate {
        /// Input SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file
        #[arg(short, long)]
        output: PathBuf,

        /// Target language
        #[arg(short = 'l', long)]
        target_lang: String,
    },

    /// Embed subtitles into video file as a soft track
    Embed {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Subtitle file
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Language tag for the subtitle track
        #[arg(short = 'l', long, default_value = crate::WORKING_LANGUAGE)]
        language: String,
    },

    /// List supported source video formats
    Formats,

    /// Check that external tools and the translation backend are reachable
    Check,
}
