//! Streaming audio assembly.
//!
//! Builds the combined track by concatenating per-sentence clips with
//! silence in between through ffmpeg's concat demuxer, never decoding the
//! whole project into memory. While walking the concat list it accumulates
//! the timeline the subtitle builder consumes, then verifies the final file
//! and scales the timeline if encoder drift exceeds one second.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::audio::{check_ffmpeg, check_ffprobe, probe_duration, tempo, TimelineEntry};
use crate::error::{BilangError, Result};

/// Audio inputs for one sentence, in playback order.
#[derive(Debug, Clone)]
pub struct SentenceAudio {
    pub idx: usize,
    pub source: PathBuf,
    pub target: PathBuf,
    /// Word-card clips appended after the target sentence.
    pub wordcards: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub pause_between_langs_ms: u64,
    pub pause_between_sentences_ms: u64,
    pub pause_before_wordcard_ms: u64,
    pub pause_between_words_ms: u64,
    pub speed_source: f64,
    pub speed_target: f64,
    /// Worker bound for the tempo-filter pass; assembly itself is serial.
    pub tempo_workers: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            pause_between_langs_ms: 500,
            pause_between_sentences_ms: 800,
            pause_before_wordcard_ms: 300,
            pause_between_words_ms: 200,
            speed_source: 1.0,
            speed_target: 1.0,
            tempo_workers: 4,
        }
    }
}

pub struct AudioAssembler {
    config: AssemblerConfig,
}

impl AudioAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Concatenate all sentence audio into `output` and return the timeline.
    /// Entries come out in strictly ascending start order regardless of the
    /// input order of `sentences`.
    pub async fn combine(
        &self,
        sentences: &[SentenceAudio],
        output: &Path,
    ) -> Result<Vec<TimelineEntry>> {
        if sentences.is_empty() {
            return Err(BilangError::Audio("No sentences to combine".to_string()));
        }

        check_ffmpeg()?;
        check_ffprobe()?;

        let mut ordered: Vec<SentenceAudio> = sentences.to_vec();
        ordered.sort_by_key(|s| s.idx);

        // Scratch directory is removed on every exit path when this drops.
        let scratch = TempDir::new()?;
        let scratch_path = scratch.path();

        let silence_lang = self
            .make_silence(scratch_path, "lang", self.config.pause_between_langs_ms)?;
        let silence_sentence = self.make_silence(
            scratch_path,
            "sentence",
            self.config.pause_between_sentences_ms,
        )?;
        let has_wordcards = ordered.iter().any(|s| !s.wordcards.is_empty());
        let (silence_wordcard, silence_wordpause) = if has_wordcards {
            (
                Some(self.make_silence(
                    scratch_path,
                    "wordcard",
                    self.config.pause_before_wordcard_ms,
                )?),
                Some(self.make_silence(
                    scratch_path,
                    "wordpause",
                    self.config.pause_between_words_ms,
                )?),
            )
        } else {
            (None, None)
        };

        let processed = self.tempo_pass(&ordered, scratch_path).await?;

        // Serial walk: the timeline is strictly sequential.
        let mut concat_entries: Vec<PathBuf> = Vec::new();
        let mut timeline: Vec<TimelineEntry> = Vec::with_capacity(ordered.len());
        let mut durations: HashMap<PathBuf, f64> = HashMap::new();
        let mut current = 0.0f64;
        let lang_pause = self.config.pause_between_langs_ms as f64 / 1000.0;
        let sentence_pause = self.config.pause_between_sentences_ms as f64 / 1000.0;
        let wordcard_pause = self.config.pause_before_wordcard_ms as f64 / 1000.0;
        let word_pause = self.config.pause_between_words_ms as f64 / 1000.0;

        for (i, sentence) in ordered.iter().enumerate() {
            let start = current;

            let src = processed
                .get(&(sentence.idx, Channel::Source))
                .cloned()
                .unwrap_or_else(|| sentence.source.clone());
            let source_duration = probe_cached(&mut durations, &src)?;
            current += source_duration;
            concat_entries.push(src);

            concat_entries.push(silence_lang.clone());
            current += lang_pause;

            let tgt = processed
                .get(&(sentence.idx, Channel::Target))
                .cloned()
                .unwrap_or_else(|| sentence.target.clone());
            let target_duration = probe_cached(&mut durations, &tgt)?;
            current += target_duration;
            concat_entries.push(tgt);

            let mut wordcard_start = None;
            let mut wordcard_duration = 0.0;
            if !sentence.wordcards.is_empty() {
                let pause_file = silence_wordcard.as_ref().expect("silence generated");
                let gap_file = silence_wordpause.as_ref().expect("silence generated");

                concat_entries.push(pause_file.clone());
                current += wordcard_pause;
                wordcard_start = Some(current);
                // The lead-in pause counts toward the word-card duration so
                // the per-entry sum lands exactly on `end`.
                wordcard_duration += wordcard_pause;

                let last = sentence.wordcards.len() - 1;
                for (w, card) in sentence.wordcards.iter().enumerate() {
                    let dur = probe_cached(&mut durations, card)?;
                    concat_entries.push(card.clone());
                    current += dur;
                    wordcard_duration += dur;
                    if w < last {
                        concat_entries.push(gap_file.clone());
                        current += word_pause;
                        wordcard_duration += word_pause;
                    }
                }
            }

            let end = current;
            if i + 1 < ordered.len() {
                concat_entries.push(silence_sentence.clone());
                current += sentence_pause;
            }

            timeline.push(TimelineEntry {
                sentence_idx: sentence.idx,
                start,
                source_duration,
                pause_between: lang_pause,
                target_duration,
                wordcard_start,
                wordcard_duration,
                end,
            });
        }

        self.run_concat(scratch_path, &concat_entries, output)?;

        let metadata = output.metadata().map_err(|e| {
            BilangError::Audio(format!("Combined audio was not created: {e}"))
        })?;
        if metadata.len() == 0 {
            return Err(BilangError::Audio("Combined audio is empty".to_string()));
        }

        let expected = timeline.last().map(|e| e.end).unwrap_or(0.0);
        let actual = probe_duration(output)?;
        if (actual - expected).abs() > 1.0 && expected > 0.0 {
            let scale = actual / expected;
            warn!(
                "Timeline drift {:.2}s (expected {:.2}s, actual {:.2}s); scaling by {:.4}",
                actual - expected,
                expected,
                actual,
                scale
            );
            scale_timeline(&mut timeline, scale);
        }

        info!(
            "Combined {} sentences into {} ({:.1}s)",
            ordered.len(),
            output.display(),
            actual
        );
        Ok(timeline)
    }

    /// Apply per-language tempo factors to the sentence clips, bounded by
    /// `tempo_workers`. Returns replacement paths for processed inputs.
    async fn tempo_pass(
        &self,
        sentences: &[SentenceAudio],
        scratch: &Path,
    ) -> Result<HashMap<(usize, Channel), PathBuf>> {
        let mut jobs: Vec<(usize, Channel, PathBuf, PathBuf, f64)> = Vec::new();
        if (self.config.speed_source - 1.0).abs() > f64::EPSILON {
            for s in sentences {
                let out = scratch.join(format!("src_{}.mp3", s.idx));
                jobs.push((s.idx, Channel::Source, s.source.clone(), out, self.config.speed_source));
            }
        }
        if (self.config.speed_target - 1.0).abs() > f64::EPSILON {
            for s in sentences {
                let out = scratch.join(format!("tgt_{}.mp3", s.idx));
                jobs.push((s.idx, Channel::Target, s.target.clone(), out, self.config.speed_target));
            }
        }

        let mut processed = HashMap::new();
        if jobs.is_empty() {
            return Ok(processed);
        }

        debug!("Tempo-processing {} clips", jobs.len());
        let semaphore = Arc::new(Semaphore::new(self.config.tempo_workers.max(1)));
        let mut futures = FuturesUnordered::new();

        for (idx, channel, input, out, speed) in jobs {
            let sem = semaphore.clone();
            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");
                let result = tokio::task::spawn_blocking(move || {
                    tempo::change_tempo(&input, speed, &out)
                })
                .await
                .map_err(|e| BilangError::Audio(format!("Tempo task failed: {e}")))?;
                Ok::<_, BilangError>((idx, channel, result))
            });
        }

        while let Some(result) = futures.next().await {
            let (idx, channel, path) = result?;
            processed.insert((idx, channel), path);
        }
        Ok(processed)
    }

    fn make_silence(&self, scratch: &Path, name: &str, duration_ms: u64) -> Result<PathBuf> {
        let path = scratch.join(format!("silence_{name}.mp3"));
        let spec = format!(
            "anullsrc=r=44100:cl=stereo:d={}",
            duration_ms as f64 / 1000.0
        );
        let output = Command::new("ffmpeg")
            .args(["-y", "-f", "lavfi", "-i", &spec, "-c:a", "libmp3lame", "-q:a", "2"])
            .arg(&path)
            .output()
            .map_err(|e| BilangError::Audio(format!("Failed to run FFmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BilangError::Audio(format!(
                "Silence generation failed: {stderr}"
            )));
        }
        Ok(path)
    }

    fn run_concat(&self, scratch: &Path, entries: &[PathBuf], output: &Path) -> Result<()> {
        let list_path = scratch.join("concat.txt");
        let mut list = String::new();
        for entry in entries {
            let absolute = entry
                .canonicalize()
                .unwrap_or_else(|_| entry.clone());
            list.push_str(&format!("file '{}'\n", absolute.display()));
        }
        std::fs::write(&list_path, list)?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = Command::new("ffmpeg")
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c:a", "libmp3lame", "-q:a", "2"])
            .arg(output)
            .output()
            .map_err(|e| BilangError::Audio(format!("Failed to run FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BilangError::Audio(format!("FFmpeg concat failed: {stderr}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Source,
    Target,
}

fn probe_cached(cache: &mut HashMap<PathBuf, f64>, path: &Path) -> Result<f64> {
    if let Some(&dur) = cache.get(path) {
        return Ok(dur);
    }
    if !path.exists() {
        return Err(BilangError::Audio(format!(
            "Missing audio clip: {}",
            path.display()
        )));
    }
    let dur = probe_duration(path)?;
    cache.insert(path.to_path_buf(), dur);
    Ok(dur)
}

/// Multiply every timeline field by `scale`. Used when the probed duration
/// of the combined file drifts more than a second from the accumulated sum.
pub fn scale_timeline(timeline: &mut [TimelineEntry], scale: f64) {
    for entry in timeline.iter_mut() {
        entry.start *= scale;
        entry.source_duration *= scale;
        entry.pause_between *= scale;
        entry.target_duration *= scale;
        entry.end *= scale;
        if let Some(ws) = entry.wordcard_start.as_mut() {
            *ws *= scale;
        }
        entry.wordcard_duration *= scale;
    }
}

/// Build the timeline arithmetic alone, from known clip durations. The
/// assembler derives the same numbers from ffprobe; this pure form exists so
/// the layout math is testable without audio files.
pub fn layout_timeline(
    durations: &[(usize, f64, f64, Vec<f64>)],
    config: &AssemblerConfig,
) -> Vec<TimelineEntry> {
    let lang_pause = config.pause_between_langs_ms as f64 / 1000.0;
    let sentence_pause = config.pause_between_sentences_ms as f64 / 1000.0;
    let wordcard_pause = config.pause_before_wordcard_ms as f64 / 1000.0;
    let word_pause = config.pause_between_words_ms as f64 / 1000.0;

    let mut timeline = Vec::with_capacity(durations.len());
    let mut current = 0.0;

    for (i, (idx, src, tgt, cards)) in durations.iter().enumerate() {
        let start = current;
        current += src + lang_pause + tgt;

        let mut wordcard_start = None;
        let mut wordcard_duration = 0.0;
        if !cards.is_empty() {
            current += wordcard_pause;
            wordcard_start = Some(current);
            wordcard_duration += wordcard_pause;
            for (w, card) in cards.iter().enumerate() {
                current += card;
                wordcard_duration += card;
                if w + 1 < cards.len() {
                    current += word_pause;
                    wordcard_duration += word_pause;
                }
            }
        }

        let end = current;
        if i + 1 < durations.len() {
            current += sentence_pause;
        }

        timeline.push(TimelineEntry {
            sentence_idx: *idx,
            start,
            source_duration: *src,
            pause_between: lang_pause,
            target_duration: *tgt,
            wordcard_start,
            wordcard_duration,
            end,
        });
    }
    timeline
}
