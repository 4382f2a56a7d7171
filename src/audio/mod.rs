//! Audio tooling: ffmpeg/ffprobe plumbing, validation, and the timeline
//! types shared between the assembler and the subtitle builder.

pub mod assembler;
pub mod tempo;

pub use assembler::{AssemblerConfig, AudioAssembler, SentenceAudio};

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BilangError, Result};

/// Per-sentence time layout of the combined audio, in seconds.
/// Invariant: `start + source_duration + pause_between + target_duration
/// + wordcard_duration = end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub sentence_idx: usize,
    pub start: f64,
    pub source_duration: f64,
    pub pause_between: f64,
    pub target_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wordcard_start: Option<f64>,
    #[serde(default)]
    pub wordcard_duration: f64,
    pub end: f64,
}

/// Check that ffmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg").arg("-version").output().map_err(|e| {
        BilangError::Audio(format!(
            "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
        ))
    })?;

    if !output.status.success() {
        return Err(BilangError::Audio("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check that ffprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe").arg("-version").output().map_err(|e| {
        BilangError::Audio(format!(
            "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
        ))
    })?;

    if !output.status.success() {
        return Err(BilangError::Audio("FFprobe check failed".to_string()));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Container duration in seconds, via ffprobe.
pub fn probe_duration(input: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|e| BilangError::Audio(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BilangError::Audio(format!("FFprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    duration_str.trim().parse().map_err(|e| {
        BilangError::Audio(format!(
            "Failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })
}

/// Container duration in milliseconds.
pub fn probe_duration_ms(input: &Path) -> Result<u64> {
    Ok((probe_duration(input)? * 1000.0).round() as u64)
}

/// Validate a freshly synthesized audio file: it must exist, be plausibly
/// sized, and decode to at least `min_duration` seconds. A failure here is a
/// `Validation` error, which adapters treat as retryable.
pub fn validate_audio_file(path: &Path, min_duration: f64) -> Result<()> {
    let metadata = path
        .metadata()
        .map_err(|_| BilangError::Validation(format!("Audio file missing: {}", path.display())))?;

    if metadata.len() < 100 {
        return Err(BilangError::Validation(format!(
            "Audio file too small ({} bytes): {}",
            metadata.len(),
            path.display()
        )));
    }

    let duration = probe_duration(path)
        .map_err(|e| BilangError::Validation(format!("Unreadable audio: {e}")))?;
    if duration < min_duration {
        return Err(BilangError::Validation(format!(
            "Audio too short ({duration:.3}s < {min_duration}s): {}",
            path.display()
        )));
    }

    Ok(())
}
