use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{AcquiredMedia, AcquisitionWorker, DownloadProgress, ProgressSink, TransferOptions};

/// How long stream readers may keep draining after the worker exits
const READER_GRACE: Duration = Duration::from_secs(2);

const TYPE_COMPARISON_ERROR: &str = "'>' not supported between instances of 'float' and 'str'";

/// Why a single attempt did not yield a usable file
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("no result from worker")]
    NoResult,

    #[error("{0}")]
    Reported(String),

    #[error("reported file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("reported file is empty: {}", .0.display())]
    EmptyFile(PathBuf),
}

impl AttemptFailure {
    /// Permanent failures stop the retry loop early
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptFailure::Spawn(_) => false,
            AttemptFailure::Reported(msg) => {
                let msg = msg.to_lowercase();
                !(msg.contains("unsupported url")
                    || msg.contains("private video")
                    || msg.contains("video unavailable"))
            }
            _ => true,
        }
    }
}

/// One line of worker output, classified by its tag
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerLine {
    Progress(DownloadProgress),
    Result(AcquiredMedia),
    Error(String),
    Other,
}

pub fn parse_line(line: &str) -> WorkerLine {
    let line = line.trim();

    if let Some(payload) = line.strip_prefix("PROGRESS ") {
        return match serde_json::from_str::<Value>(payload) {
            Ok(value) => WorkerLine::Progress(progress_from_value(&value)),
            Err(_) => WorkerLine::Progress(DownloadProgress::default()),
        };
    }

    if let Some(payload) = line.strip_prefix("RESULT ") {
        return match serde_json::from_str::<AcquiredMedia>(payload) {
            Ok(media) => WorkerLine::Result(media),
            Err(e) => WorkerLine::Error(format!("malformed worker result: {}", e)),
        };
    }

    if let Some(message) = line.strip_prefix("ERROR:") {
        return WorkerLine::Error(rewrite_known_error(message.trim()));
    }

    WorkerLine::Other
}

/// Coerce a loosely typed progress field to `f64`; anything unusable is zero
pub fn coerce_number(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if number.is_finite() && number >= 0.0 { number } else { 0.0 }
}

fn progress_from_value(value: &Value) -> DownloadProgress {
    let total = match coerce_number(&value["total_bytes"]) {
        t if t > 0.0 => t,
        _ => coerce_number(&value["total_bytes_estimate"]),
    };

    DownloadProgress {
        status: value["status"].as_str().unwrap_or_default().to_string(),
        downloaded_bytes: coerce_number(&value["downloaded_bytes"]),
        total_bytes: total,
        speed: coerce_number(&value["speed"]),
        eta: coerce_number(&value["eta"]),
    }
}

/// Replace extractor errors with a known cause by a stable message
pub fn rewrite_known_error(message: &str) -> String {
    if message.contains(TYPE_COMPARISON_ERROR) {
        "Type comparison issue - extractor compatibility problem".to_string()
    } else {
        message.to_string()
    }
}

/// Run a single attempt under a hard deadline
pub async fn run_attempt(
    worker: &dyn AcquisitionWorker,
    locator: &str,
    options: &TransferOptions,
    deadline: Duration,
    progress: Option<ProgressSink>,
) -> Result<AcquiredMedia, AttemptFailure> {
    let mut cmd = worker.command(locator, options);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("Starting {} worker: {:?}", worker.name(), cmd);
    let mut child = cmd.spawn().map_err(|e| AttemptFailure::Spawn(format!("{}: {}", worker.name(), e)))?;

    let (result_tx, mut result_rx) = oneshot::channel();
    let result_tx = Arc::new(Mutex::new(Some(result_tx)));
    let last_error = Arc::new(Mutex::new(None::<String>));

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, result_tx.clone(), last_error.clone(), progress.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, result_tx.clone(), last_error.clone(), progress));
    }
    // Only the readers hold the sender now; the receiver closes once both finish
    drop(result_tx);

    let status = match timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            abort_readers(readers);
            return Err(AttemptFailure::Reported(format!("failed to wait for worker: {}", e)));
        }
        Err(_) => {
            warn!("{} worker exceeded {:?}, killing it", worker.name(), deadline);
            kill_worker(&mut child).await;
            abort_readers(readers);
            return Err(AttemptFailure::Timeout(deadline));
        }
    };

    // Descendants may still hold the pipes open; a reported result ends the wait early
    let drained = timeout(READER_GRACE, &mut result_rx).await;
    abort_readers(readers);
    debug!("{} worker exited with {}", worker.name(), status);

    if let Ok(Ok(media)) = drained {
        return Ok(media);
    }

    let reported = last_error.lock().ok().and_then(|mut guard| guard.take());
    match reported {
        Some(message) => Err(AttemptFailure::Reported(message)),
        None => Err(AttemptFailure::NoResult),
    }
}

fn spawn_reader<R>(
    stream: R,
    result_tx: Arc<Mutex<Option<oneshot::Sender<AcquiredMedia>>>>,
    last_error: Arc<Mutex<Option<String>>>,
    progress: Option<ProgressSink>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_line(&line) {
                WorkerLine::Progress(snapshot) => {
                    if let Some(sink) = &progress {
                        sink(snapshot);
                    }
                }
                WorkerLine::Result(media) => {
                    let sender = result_tx.lock().ok().and_then(|mut guard| guard.take());
                    if let Some(sender) = sender {
                        let _ = sender.send(media);
                    }
                }
                WorkerLine::Error(message) => {
                    debug!("Worker error: {}", message);
                    if let Ok(mut guard) = last_error.lock() {
                        *guard = Some(message);
                    }
                }
                WorkerLine::Other => {}
            }
        }
    })
}

fn abort_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        reader.abort();
    }
}

/// Kill the worker and everything it spawned
async fn kill_worker(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own process group
        if let Some(pid) = child.id() {
            // SAFETY: killpg only sends a signal; the group id is our live child's pid
            // because it was spawned with process_group(0).
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Worker already gone: {}", e);
    }
}
