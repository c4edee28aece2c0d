use std::fmt::Write as _;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{Result, SubtitlerError};
use crate::transcribe::TranscriptionSegment;

/// One numbered block of an SRT document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleBlock {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub lines: Vec<String>,
}

impl SubtitleBlock {
    /// Text lines joined into a single line
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// Build blocks from transcription segments, renumbering from 1
pub fn blocks_from_segments(segments: &[TranscriptionSegment]) -> Vec<SubtitleBlock> {
    segments
        .iter()
        .filter_map(|segment| {
            let lines = normalize_lines(&segment.text);
            if lines.is_empty() {
                return None;
            }
            Some((seconds_to_millis(segment.start), seconds_to_millis(segment.end), lines))
        })
        .enumerate()
        .map(|(i, (start_ms, end_ms, lines))| SubtitleBlock {
            index: i + 1,
            start_ms,
            end_ms,
            lines,
        })
        .collect()
}

/// Trimmed, non-empty lines of a free-text field
pub fn normalize_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render segments as SRT text
pub fn format_srt(segments: &[TranscriptionSegment]) -> String {
    render_blocks(&blocks_from_segments(segments))
}

/// Serialize blocks; the output is what `parse_srt` reads back
pub fn render_blocks(blocks: &[SubtitleBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            block.index,
            format_millis(block.start_ms),
            format_millis(block.end_ms),
            block.lines.join("\n")
        );
    }
    out
}

/// Parse SRT text into blocks
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleBlock>> {
    let normalized = content.replace("\r\n", "\n");
    let normalized = normalized.trim_start_matches('\u{feff}');
    let mut blocks = Vec::new();

    for chunk in normalized.split("\n\n") {
        let mut lines = chunk.lines().filter(|line| !line.trim().is_empty());
        let Some(index_line) = lines.next() else {
            continue;
        };

        let index = index_line
            .trim()
            .parse::<usize>()
            .map_err(|_| SubtitlerError::Subtitle(format!("Invalid block index '{}'", index_line.trim())))?;

        let timing = lines
            .next()
            .ok_or_else(|| SubtitlerError::Subtitle(format!("Block {} has no timing line", index)))?;
        let (start, end) = timing
            .split_once("-->")
            .ok_or_else(|| SubtitlerError::Subtitle(format!("Block {} has a malformed timing line", index)))?;

        let text: Vec<String> = lines.map(|line| line.trim().to_string()).collect();
        if text.is_empty() {
            return Err(SubtitlerError::Subtitle(format!("Block {} has no text", index)));
        }

        blocks.push(SubtitleBlock {
            index,
            start_ms: parse_timestamp(start.trim())?,
            end_ms: parse_timestamp(end.trim())?,
            lines: text,
        });
    }

    Ok(blocks)
}

/// Write an SRT document to disk
pub async fn write_srt<P: AsRef<Path>>(content: &str, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Writing SRT file: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(output_path, content).await?;

    Ok(())
}

/// Whole milliseconds of `seconds`, floored after snapping to microseconds
fn seconds_to_millis(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let micros = (seconds * 1_000_000.0).round() as u64;
    micros / 1_000
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    format_millis(seconds_to_millis(seconds))
}

fn format_millis(total_milliseconds: u64) -> String {
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

fn parse_timestamp(value: &str) -> Result<u64> {
    let invalid = || SubtitlerError::Subtitle(format!("Invalid timestamp '{}'", value));

    let (clock, millis) = value.split_once(',').ok_or_else(invalid)?;
    let mut parts = clock.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };

    let field = |raw: &str| raw.parse::<u64>().map_err(|_| invalid());
    let (hours, minutes, seconds, millis) = (field(h)?, field(m)?, field(s)?, field(millis)?);
    if minutes >= 60 || seconds >= 60 || millis >= 1000 {
        return Err(invalid());
    }

    Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}
