//! ASS subtitle generation with karaoke word highlighting.
//!
//! For each sentence the viewer sees three phases: source line karaoke while
//! the source audio plays, a held highlight through the inter-language
//! pause, then target line karaoke. Rare words sit at the top of the frame
//! for the whole sentence.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::audio::TimelineEntry;
use crate::error::Result;

/// A rare-word pair rendered on the word card: target word and its
/// translation into the viewer's language.
#[derive(Debug, Clone)]
pub struct WordCardEntry {
    pub word: String,
    pub translation: String,
}

#[derive(Debug, Clone)]
pub struct AssConfig {
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
    pub font_name: String,
    /// Maximum rare words shown on one card.
    pub max_card_words: usize,
}

impl Default for AssConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            font_size: 48,
            font_name: "Arial".to_string(),
            max_card_words: 7,
        }
    }
}

pub struct AssGenerator {
    config: AssConfig,
}

fn sentence_dash_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?»])\s*—\s*").expect("static regex"))
}

fn comma_dash_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*—\s*").expect("static regex"))
}

fn hyphen_dash_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([.!?"])\s*-\s+"#).expect("static regex"))
}

impl AssGenerator {
    pub fn new(config: AssConfig) -> Self {
        Self { config }
    }

    /// Header with script info and the style table. ASS colors are &HAABBGGRR.
    fn header(&self) -> String {
        let AssConfig {
            width,
            height,
            font_size,
            font_name,
            ..
        } = &self.config;
        let target_size = (*font_size as f64 * 0.9) as u32;
        let card_size = (*font_size as f64 * 0.7) as u32;

        format!(
            "[Script Info]\n\
             Title: bilang subtitles\n\
             ScriptType: v4.00+\n\
             PlayResX: {width}\n\
             PlayResY: {height}\n\
             WrapStyle: 0\n\
             \n\
             [V4+ Styles]\n\
             Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
             Style: Source,{font_name},{font_size},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,3,1,2,30,30,150,1\n\
             Style: SourceDim,{font_name},{font_size},&H00888888,&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,3,1,2,30,30,150,1\n\
             Style: SourceHighlight,{font_name},{font_size},&H0000FFFF,&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,3,1,2,30,30,150,1\n\
             Style: Target,{font_name},{target_size},&H00AAAAAA,&H000000FF,&H00000000,&H80000000,0,0,0,0,100,100,0,0,1,2,1,2,30,30,50,1\n\
             Style: TargetHighlight,{font_name},{target_size},&H0000FF00,&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,2,1,2,30,30,50,1\n\
             Style: WordCard,{font_name},{card_size},&H0000FFFF,&H000000FF,&H00000000,&H80000000,1,0,0,0,100,100,0,0,1,2,1,8,30,30,50,1\n\
             \n\
             [Events]\n\
             Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n"
        )
    }

    /// Insert line breaks before dialogue dashes so multi-speaker sentences
    /// wrap one speaker per line.
    fn format_dialogue(&self, text: &str) -> String {
        let s = sentence_dash_re().replace_all(text, "${1}\\N— ");
        let s = comma_dash_re().replace_all(&s, ",\\N— ");
        let s = hyphen_dash_re().replace_all(&s, "${1}\\N- ");
        s.into_owned()
    }

    /// Karaoke line: each word carries a `\k` duration in centiseconds,
    /// proportional to its character count. Durations sum exactly to the
    /// line duration (the last word absorbs rounding).
    fn karaoke_line(&self, text: &str, start_ms: u64, duration_ms: u64, style: &str) -> String {
        let segments: Vec<&str> = text.split("\\N").collect();
        let words: Vec<&str> = segments
            .iter()
            .flat_map(|s| s.split_whitespace())
            .collect();
        let total_chars: usize = words.iter().map(|w| w.chars().count()).sum();
        let total_cs = duration_ms / 10;

        let mut karaoke = String::from("{\\k0}");
        let mut spent_cs = 0u64;
        let mut word_counter = 0usize;
        let word_total = words.len();

        for (seg_idx, segment) in segments.iter().enumerate() {
            if seg_idx > 0 {
                karaoke.push_str("\\N");
            }
            let seg_words: Vec<&str> = segment.split_whitespace().collect();
            for (w_idx, word) in seg_words.iter().enumerate() {
                word_counter += 1;
                let dur_cs = if word_counter == word_total {
                    total_cs.saturating_sub(spent_cs)
                } else if total_chars > 0 {
                    (word.chars().count() as u64 * total_cs) / total_chars as u64
                } else {
                    0
                };
                spent_cs += dur_cs;
                if w_idx > 0 {
                    karaoke.push(' ');
                }
                karaoke.push_str(&format!("{{\\k{dur_cs}}}{word}"));
            }
        }

        let end_ms = start_ms + duration_ms;
        format!(
            "Dialogue: 0,{},{},{style},,0,0,0,,{karaoke}",
            ms_to_ass_time(start_ms),
            ms_to_ass_time(end_ms)
        )
    }

    /// Generate the full subtitle file content.
    pub fn generate(
        &self,
        sentences_source: &[String],
        sentences_target: &[String],
        rare_words: &HashMap<usize, Vec<WordCardEntry>>,
        timeline: &[TimelineEntry],
    ) -> String {
        let mut content = self.header();
        let by_idx: HashMap<usize, &TimelineEntry> =
            timeline.iter().map(|e| (e.sentence_idx, e)).collect();

        for idx in 0..sentences_source.len() {
            let Some(entry) = by_idx.get(&idx) else {
                warn!("No timeline entry for sentence {idx}; skipping subtitles");
                continue;
            };

            let start_ms = (entry.start * 1000.0) as u64;
            let src_dur_ms = (entry.source_duration * 1000.0) as u64;
            let tgt_dur_ms = (entry.target_duration * 1000.0) as u64;
            let pause_ms = (entry.pause_between * 1000.0) as u64;
            let end_ms = (entry.end * 1000.0) as u64;
            let source_end_ms = start_ms + src_dur_ms;
            let target_start_ms = source_end_ms + pause_ms;

            let source_text = self.format_dialogue(
                sentences_source.get(idx).map(String::as_str).unwrap_or(""),
            );
            let target_text = self.format_dialogue(
                sentences_target.get(idx).map(String::as_str).unwrap_or(""),
            );

            // Word card pinned to the top for the whole sentence.
            if let Some(words) = rare_words.get(&idx) {
                if !words.is_empty() {
                    let card: Vec<String> = words
                        .iter()
                        .take(self.config.max_card_words)
                        .map(|w| format!("{} → {}", w.word, w.translation))
                        .collect();
                    content.push_str(&format!(
                        "Dialogue: 1,{},{},WordCard,,0,0,0,,{}\n",
                        ms_to_ass_time(start_ms),
                        ms_to_ass_time(end_ms),
                        card.join("\\N")
                    ));
                }
            }

            // Phase 1: source karaoke, target visible but dim.
            content.push_str(&format!(
                "Dialogue: 0,{},{},Target,,0,0,0,,{}\n",
                ms_to_ass_time(start_ms),
                ms_to_ass_time(target_start_ms),
                target_text
            ));
            content.push_str(&self.karaoke_line(&source_text, start_ms, src_dur_ms, "Source"));
            content.push('\n');

            // Phase 2: pause — source held highlighted.
            content.push_str(&format!(
                "Dialogue: 0,{},{},SourceHighlight,,0,0,0,,{}\n",
                ms_to_ass_time(source_end_ms),
                ms_to_ass_time(target_start_ms),
                source_text
            ));

            // Phase 3: target karaoke, source dimmed.
            content.push_str(&format!(
                "Dialogue: 0,{},{},SourceDim,,0,0,0,,{}\n",
                ms_to_ass_time(target_start_ms),
                ms_to_ass_time(end_ms),
                source_text
            ));
            content.push_str(&self.karaoke_line(
                &target_text,
                target_start_ms,
                tgt_dur_ms,
                "Target",
            ));
            content.push('\n');
        }

        content
    }

    /// Generate and write the subtitle file.
    pub fn write(
        &self,
        sentences_source: &[String],
        sentences_target: &[String],
        rare_words: &HashMap<usize, Vec<WordCardEntry>>,
        timeline: &[TimelineEntry],
        output: &Path,
    ) -> Result<()> {
        let content = self.generate(sentences_source, sentences_target, rare_words, timeline);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, content)?;
        Ok(())
    }
}

/// Milliseconds to ASS time format (H:MM:SS.cc).
fn ms_to_ass_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let centis = (ms % 1000) / 10;
    format!("{hours}:{minutes:02}:{seconds:02}.{centis:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(idx: usize, start: f64, src: f64, tgt: f64) -> TimelineEntry {
        TimelineEntry {
            sentence_idx: idx,
            start,
            source_duration: src,
            pause_between: 0.5,
            target_duration: tgt,
            wordcard_start: None,
            wordcard_duration: 0.0,
            end: start + src + 0.5 + tgt,
        }
    }

    #[test]
    fn test_ms_to_ass_time() {
        assert_eq!(ms_to_ass_time(0), "0:00:00.00");
        assert_eq!(ms_to_ass_time(1500), "0:00:01.50");
        assert_eq!(ms_to_ass_time(3_661_230), "1:01:01.23");
    }

    #[test]
    fn test_header_declares_styles() {
        let gen = AssGenerator::new(AssConfig::default());
        let header = gen.header();
        for style in [
            "Style: Source,",
            "Style: SourceDim,",
            "Style: SourceHighlight,",
            "Style: Target,",
            "Style: TargetHighlight,",
            "Style: WordCard,",
        ] {
            assert!(header.contains(style), "missing {style}");
        }
        assert!(header.contains("PlayResX: 1920"));
    }

    #[test]
    fn test_karaoke_durations_sum_to_line() {
        let gen = AssGenerator::new(AssConfig::default());
        let line = gen.karaoke_line("alpha beta gamma", 0, 3000, "Source");
        let re = Regex::new(r"\\k(\d+)").unwrap();
        let total: u64 = re
            .captures_iter(&line)
            .map(|c| c[1].parse::<u64>().unwrap())
            .sum();
        assert_eq!(total, 300); // centiseconds
    }

    #[test]
    fn test_karaoke_proportional_to_chars() {
        let gen = AssGenerator::new(AssConfig::default());
        let line = gen.karaoke_line("a bbbb", 0, 1000, "Source");
        let re = Regex::new(r"\\k(\d+)").unwrap();
        let durations: Vec<u64> = re
            .captures_iter(&line)
            .map(|c| c[1].parse::<u64>().unwrap())
            .collect();
        // {\k0} prefix, then 1/5 and 4/5 of 100cs.
        assert_eq!(durations, vec![0, 20, 80]);
    }

    #[test]
    fn test_format_dialogue_breaks() {
        let gen = AssGenerator::new(AssConfig::default());
        assert_eq!(
            gen.format_dialogue("сказал он. — Привет!"),
            "сказал он.\\N— Привет!"
        );
        assert_eq!(
            gen.format_dialogue("крикнул, — Стой!"),
            "крикнул,\\N— Стой!"
        );
        assert_eq!(gen.format_dialogue("dijo. - Hola"), "dijo.\\N- Hola");
    }

    #[test]
    fn test_generate_event_phases() {
        let gen = AssGenerator::new(AssConfig::default());
        let source = vec!["Привет мир.".to_string()];
        let target = vec!["Hola mundo.".to_string()];
        let mut rare = HashMap::new();
        rare.insert(
            0,
            vec![WordCardEntry {
                word: "mundo".to_string(),
                translation: "мир".to_string(),
            }],
        );
        let timeline = vec![entry(0, 0.0, 2.0, 2.5)];

        let out = gen.generate(&source, &target, &rare, &timeline);
        assert!(out.contains("WordCard,,0,0,0,,mundo → мир"));
        assert!(out.contains("SourceHighlight"));
        assert!(out.contains("SourceDim"));
        // Target dim phase runs from sentence start to target start (2.5s).
        assert!(out.contains("Dialogue: 0,0:00:00.00,0:00:02.50,Target,"));
        // Source karaoke covers the source duration.
        assert!(out.contains("Dialogue: 0,0:00:00.00,0:00:02.00,Source,"));
    }

    #[test]
    fn test_missing_timeline_entry_skipped() {
        let gen = AssGenerator::new(AssConfig::default());
        let source = vec!["Один.".to_string(), "Два.".to_string()];
        let target = vec!["Uno.".to_string(), "Dos.".to_string()];
        let timeline = vec![entry(0, 0.0, 1.0, 1.0)];

        let out = gen.generate(&source, &target, &HashMap::new(), &timeline);
        assert!(out.contains("Uno."));
        assert!(!out.contains("Dos."));
    }

    #[test]
    fn test_word_card_capped() {
        let gen = AssGenerator::new(AssConfig::default());
        let source = vec!["x".to_string()];
        let target = vec!["y".to_string()];
        let mut rare = HashMap::new();
        rare.insert(
            0,
            (0..10)
                .map(|i| WordCardEntry {
                    word: format!("w{i}"),
                    translation: format!("t{i}"),
                })
                .collect(),
        );
        let timeline = vec![entry(0, 0.0, 1.0, 1.0)];
        let out = gen.generate(&source, &target, &rare, &timeline);
        assert!(out.contains("w6 → t6"));
        assert!(!out.contains("w7 → t7"));
    }
}
