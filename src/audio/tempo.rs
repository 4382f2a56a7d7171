//! Pitch-preserving tempo changes through external tools.
//!
//! Prefers rubberband; falls back to ffmpeg's `atempo` filter, chaining
//! links because a single `atempo` only accepts 0.5–2.0. When neither tool
//! works the original file is used and the timeline scale correction in the
//! assembler absorbs the resulting drift.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::warn;

/// Build an ffmpeg `atempo` filter chain for an arbitrary speed factor.
pub fn build_atempo_filter(speed: f64) -> String {
    let speed = if speed <= 0.0 { 1.0 } else { speed };

    let mut filters = Vec::new();
    let mut remaining = speed;

    while remaining > 2.0 {
        filters.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        filters.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    if (remaining - 1.0).abs() > f64::EPSILON {
        filters.push(format!("atempo={remaining:.4}"));
    }

    if filters.is_empty() {
        "atempo=1.0".to_string()
    } else {
        filters.join(",")
    }
}

/// Change audio speed without changing pitch. Returns the path to use:
/// `output` when a tool succeeded, the input when speed is 1.0 or every
/// tool is absent.
pub fn change_tempo(input: &Path, speed: f64, output: &Path) -> PathBuf {
    if (speed - 1.0).abs() < f64::EPSILON {
        return input.to_path_buf();
    }

    if let Ok(result) = Command::new("rubberband")
        .args(["--tempo", &speed.to_string(), "--pitch", "1.0"])
        .arg(input)
        .arg(output)
        .output()
    {
        if result.status.success() {
            return output.to_path_buf();
        }
    }

    let filter = build_atempo_filter(speed);
    if let Ok(result) = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-filter:a", &filter, "-vn"])
        .arg(output)
        .output()
    {
        if result.status.success() {
            return output.to_path_buf();
        }
    }

    warn!(
        "Could not change tempo of {} (install rubberband or ffmpeg); using original",
        input.display()
    );
    input.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atempo_identity() {
        assert_eq!(build_atempo_filter(1.0), "atempo=1.0");
        assert_eq!(build_atempo_filter(0.0), "atempo=1.0");
        assert_eq!(build_atempo_filter(-2.0), "atempo=1.0");
    }

    #[test]
    fn test_atempo_in_range() {
        assert_eq!(build_atempo_filter(1.5), "atempo=1.5000");
        assert_eq!(build_atempo_filter(0.75), "atempo=0.7500");
    }

    #[test]
    fn test_atempo_chained_fast() {
        assert_eq!(build_atempo_filter(4.0), "atempo=2.0,atempo=2.0");
        assert_eq!(build_atempo_filter(3.0), "atempo=2.0,atempo=1.5000");
    }

    #[test]
    fn test_atempo_chained_slow() {
        assert_eq!(build_atempo_filter(0.25), "atempo=0.5,atempo=0.5");
        assert_eq!(build_atempo_filter(0.4), "atempo=0.5,atempo=0.8000");
    }

    #[test]
    fn test_unity_speed_keeps_input() {
        let input = Path::new("/tmp/in.mp3");
        let output = Path::new("/tmp/out.mp3");
        assert_eq!(change_tempo(input, 1.0, output), input);
    }
}
