//! Video rendering: combined audio + burned-in ASS subtitles over a solid
//! color or a background image.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::audio::probe_duration;
use crate::error::{BilangError, Result};

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub background_color: String,
    /// Optional still image used instead of the solid background.
    pub background_image: Option<PathBuf>,
    pub preset: String,
    pub crf: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 24,
            background_color: "black".to_string(),
            background_image: None,
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

/// Render the final video. The subtitle file must already exist; the video
/// is exactly as long as the audio track.
pub fn render_video(
    audio_path: &Path,
    subtitles_path: &Path,
    output_path: &Path,
    config: &VideoConfig,
) -> Result<PathBuf> {
    if !audio_path.exists() {
        return Err(BilangError::Audio(format!(
            "Combined audio not found: {}",
            audio_path.display()
        )));
    }
    if !subtitles_path.exists() {
        return Err(BilangError::Input(format!(
            "Subtitles not found: {}",
            subtitles_path.display()
        )));
    }

    let duration = probe_duration(audio_path)?;
    info!(
        "Rendering {}x{} video, {:.1}s audio",
        config.width, config.height, duration
    );

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let ass_filter = format!("ass={}", subtitles_path.display());
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y");

    match &config.background_image {
        Some(image) => {
            // Scale/crop the image to fill the frame and darken it so the
            // subtitles stay readable.
            let vf = format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},eq=brightness=-0.2:saturation=0.8,fps={fps},{ass}",
                w = config.width,
                h = config.height,
                fps = config.fps,
                ass = ass_filter,
            );
            cmd.args(["-loop", "1", "-i"])
                .arg(image)
                .arg("-i")
                .arg(audio_path)
                .args(["-vf", &vf]);
        }
        None => {
            let canvas = format!(
                "color=c={}:s={}x{}:r={}:d={:.3}",
                config.background_color, config.width, config.height, config.fps, duration
            );
            cmd.args(["-f", "lavfi", "-i", &canvas])
                .arg("-i")
                .arg(audio_path)
                .args(["-vf", &ass_filter]);
        }
    }

    cmd.args([
        "-c:v",
        "libx264",
        "-preset",
        &config.preset,
        "-crf",
        &config.crf.to_string(),
        "-c:a",
        "aac",
        "-b:a",
        "192k",
        "-shortest",
    ])
    .arg(output_path);

    debug!("Running ffmpeg video render");
    let result = cmd
        .output()
        .map_err(|e| BilangError::Audio(format!("Failed to run FFmpeg: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(BilangError::Audio(format!("FFmpeg render failed: {stderr}")));
    }

    if !output_path.exists() {
        return Err(BilangError::Audio(
            "Video output was not created".to_string(),
        ));
    }

    info!("Video saved to {}", output_path.display());
    Ok(output_path.to_path_buf())
}
