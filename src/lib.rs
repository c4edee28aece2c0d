//! subtitler - subtitle generation pipeline
//!
//! Takes an uploaded video or a video URL, transcribes its speech with Whisper,
//! optionally translates the subtitles, and can mux them back into the video as
//! a soft track. Work runs as background tasks tracked in an in-memory registry.

pub mod acquire;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod registry;
pub mod service;
pub mod subtitle;
pub mod task;
pub mod transcribe;
pub mod translate;
pub mod workflow;

#[cfg(test)]
mod testing;

/// Language every transcription is produced in
pub const WORKING_LANGUAGE: &str = "en";
