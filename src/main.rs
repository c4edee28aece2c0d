//! subtitler - subtitle generation pipeline
//!
//! Entry point for the command-line front end. Every subcommand drives the
//! library directly; `process` goes through the same task registry and pipeline
//! a hosting service would use.

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subtitler::acquire::{DownloadProgress, MediaAcquirer, ProgressSink, RetryController, TransferOptions, YtDlpWorker};
use subtitler::cli::{Args, Commands};
use subtitler::config::Config;
use subtitler::media::{MediaProcessorFactory, MuxRequest};
use subtitler::service::SubtitleService;
use subtitler::subtitle::{format_srt, write_srt};
use subtitler::task::{TaskId, TaskState};
use subtitler::transcribe::TranscriberFactory;
use subtitler::translate::{SubtitleTranslator, TranslatorFactory};

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the file writer alive until exit
    let _log_guard = setup_logging(args.verbose)?;

    if dotenvy::dotenv().is_ok() {
        info!("Loaded environment from .env");
    }

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Process {
            input,
            options,
            output_dir,
            poll_secs,
        } => {
            if let Some(dir) = output_dir {
                config.storage.output_dir = dir;
            }
            let service = SubtitleService::from_config(&config)?;
            let sweeper = service.spawn_retention_sweep(RETENTION_SWEEP_INTERVAL);
            let task_options = options.to_task_options(config.acquisition.max_resolution);

            let id = if input.starts_with("http://") || input.starts_with("https://") {
                service.submit_url(&input, task_options).await?
            } else {
                service.submit_file(Path::new(&input), task_options).await?
            };

            let state = follow_task(&service, &id, Duration::from_secs(poll_secs.max(1))).await?;
            sweeper.abort();
            let status = service.status(&id)?;
            println!("{}", serde_json::to_string_pretty(&status)?);

            if state == TaskState::Error {
                bail!("Task {} failed: {}", id, status.message);
            }
            if let Some(record) = service.registry().get(&id)?.artifacts {
                println!("Subtitles: {}", record.subtitle_path.display());
                if let Some(video) = record.video_path {
                    println!("Video: {}", video.display());
                }
            }
        }
        Commands::Download {
            url,
            output_dir,
            audio_only,
            max_resolution,
        } => {
            let url = subtitler::service::validate_url(&url)?;
            tokio::fs::create_dir_all(&output_dir).await?;

            let worker = Arc::new(YtDlpWorker::new(config.acquisition.clone()));
            let acquirer = RetryController::new(worker, &config.acquisition);
            let options = TransferOptions {
                max_resolution: max_resolution.unwrap_or(config.acquisition.max_resolution),
                audio_only,
                rate_limit: config.acquisition.rate_limit,
                output_dir,
                file_prefix: String::new(),
            };

            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
                    .progress_chars("#>-"),
            );
            let bar = pb.clone();
            let sink: ProgressSink = Arc::new(move |progress: DownloadProgress| {
                bar.set_position((progress.fraction() * 100.0) as u64);
                bar.set_message(progress.status.clone());
            });

            let media = acquirer.acquire(&url, &options, Some(sink)).await;
            pb.finish_and_clear();
            let media = media?;
            println!("Downloaded '{}' to {}", media.title, media.path.display());
        }
        Commands::Extract { input, output } => {
            info!("Extracting audio from: {}", input.display());
            let media = MediaProcessorFactory::create_processor(config.media.clone());
            let audio = media.extract_audio(&input, &output).await?;
            println!("Extracted {:.1}s of audio to {}", audio.duration, audio.path.display());
        }
        Commands::Transcribe { input, output } => {
            info!("Transcribing audio: {}", input.display());
            let transcriber = TranscriberFactory::create_transcriber(config.transcriber.clone());
            let transcription = transcriber.transcribe(&input).await?;
            if transcription.segments.is_empty() {
                warn!("No speech detected in {}", input.display());
            }
            write_srt(&format_srt(&transcription.segments), &output).await?;
            println!("Wrote {} segments to {}", transcription.segments.len(), output.display());
        }
        Commands::Translate {
            input,
            output,
            target_lang,
        } => {
            info!("Translating subtitles: {}", input.display());
            let srt = tokio::fs::read_to_string(&input).await?;
            let translator = SubtitleTranslator::new(TranslatorFactory::create_backend(config.translate.clone())?);

            let outcome = translator.translate_srt(&srt, &target_lang).await;
            write_srt(&outcome.text, &output).await?;
            if let Some(warning) = outcome.warning() {
                warn!("{}", warning);
            }
            println!(
                "Translated {} blocks to {} ({} kept original)",
                outcome.translated_blocks,
                output.display(),
                outcome.fallback_blocks
            );
        }
        Commands::Embed {
            video,
            subtitles,
            output_dir,
            language,
        } => {
            info!("Embedding subtitles into video: {}", video.display());
            tokio::fs::create_dir_all(&output_dir).await?;
            let stem = video
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "video".to_string());

            let media = MediaProcessorFactory::create_processor(config.media.clone());
            let path = media
                .embed_soft_subtitles(MuxRequest {
                    video_path: &video,
                    subtitle_path: &subtitles,
                    output_dir: &output_dir,
                    output_stem: &stem,
                    language: &language,
                })
                .await?;
            println!("Wrote {}", path.display());
        }
        Commands::Formats => {
            println!("Supported video formats: {}", SubtitleService::supported_formats().join(", "));
        }
        Commands::Check => {
            let mut healthy = true;

            let media = MediaProcessorFactory::create_processor(config.media.clone());
            healthy &= report("ffmpeg/ffprobe", media.check_availability().await);
            if let Ok(version) = media.get_version_info().await {
                println!("  {}", version);
            }

            let transcriber = TranscriberFactory::create_transcriber(config.transcriber.clone());
            healthy &= report(&config.transcriber.binary_path, transcriber.check_availability().await);

            let downloader = YtDlpWorker::new(config.acquisition.clone());
            healthy &= report(
                &config.acquisition.binary_path,
                downloader.check_availability().await.map(|_| ()),
            );

            match TranslatorFactory::create_backend(config.translate.clone()) {
                Ok(backend) => {
                    report("translation backend", backend.check_availability().await);
                }
                Err(e) => {
                    report("translation backend", Err(e));
                }
            }

            if !healthy {
                bail!("Required tools are missing");
            }
        }
    }

    Ok(())
}

/// Show a spinner until the task reaches a terminal state
async fn follow_task(service: &SubtitleService, id: &TaskId, interval: Duration) -> Result<TaskState> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let state = loop {
        let status = service.status(id)?;
        spinner.set_message(format!("{:>3}% {}", status.progress, status.message));
        if status.status.is_terminal() {
            break status.status;
        }
        tokio::time::sleep(interval).await;
    };

    spinner.finish_and_clear();
    Ok(state)
}

fn report(name: &str, result: subtitler::error::Result<()>) -> bool {
    match result {
        Ok(()) => {
            println!("[ok]   {}", name);
            true
        }
        Err(e) => {
            println!("[fail] {}: {}", name, e);
            false
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".subtitler").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "subtitler.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}", log_level, log_dir.join("subtitler.log").display());

    Ok(guard)
}
