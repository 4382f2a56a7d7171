use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Pipeline tuning knobs. Everything here has a sensible default; the CLI
/// and config file override selectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parallel translation requests.
    pub translation_parallel: usize,
    /// Sentences per translation batch request.
    pub translation_batch: usize,
    /// Parallel TTS requests.
    pub tts_parallel: usize,
    /// Worker bound for the assembler's tempo pass.
    pub combine_workers: usize,

    pub speed_source: f64,
    pub speed_target: f64,

    pub pause_between_langs_ms: u64,
    pub pause_between_sentences_ms: u64,
    pub pause_before_wordcard_ms: u64,
    pub pause_between_words_ms: u64,

    pub max_sentence_length: usize,

    pub zipf_threshold: f64,
    pub min_zipf: f64,
    pub max_rare_words: usize,
    pub rare_words_target_avg: f64,

    /// Synthesize spoken word cards after each target sentence.
    pub wordcards: bool,

    /// When true, a sentence whose TTS permanently failed is dropped from
    /// the final audio instead of failing the step.
    pub allow_missing_audio: bool,

    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub font_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            translation_parallel: 4,
            translation_batch: 8,
            tts_parallel: 4,
            combine_workers: 4,
            speed_source: 1.0,
            speed_target: 1.0,
            pause_between_langs_ms: 500,
            pause_between_sentences_ms: 800,
            pause_before_wordcard_ms: 300,
            pause_between_words_ms: 200,
            max_sentence_length: 95,
            zipf_threshold: 4.5,
            min_zipf: 0.5,
            max_rare_words: 6,
            rare_words_target_avg: 5.0,
            wordcards: true,
            allow_missing_audio: false,
            video_width: 1920,
            video_height: 1080,
            video_fps: 24,
            font_size: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub deepl_api_key: Option<String>,
    pub google_tts_api_key: Option<String>,
    /// Root directory holding one subdirectory per project.
    pub projects_dir: Option<PathBuf>,
    /// Directory with `<lang>.tsv` word-frequency tables.
    pub frequency_dir: Option<PathBuf>,
    pub settings: Settings,
}

impl Config {
    /// Load configuration: file first, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                if let Ok(file_config) = toml::from_str::<Config>(&contents) {
                    config = file_config;
                }
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DEEPL_API_KEY") {
            config.deepl_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GOOGLE_TTS_API_KEY") {
            config.google_tts_api_key = Some(key);
        }
        if let Ok(dir) = std::env::var("BILANG_PROJECTS_DIR") {
            config.projects_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("BILANG_FREQUENCY_DIR") {
            config.frequency_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// Effective projects root (default `./projects`).
    pub fn projects_dir(&self) -> PathBuf {
        self.projects_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("projects"))
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bilang").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.pause_between_langs_ms, 500);
        assert_eq!(settings.pause_between_sentences_ms, 800);
        assert_eq!(settings.max_sentence_length, 95);
        assert!((settings.zipf_threshold - 4.5).abs() < 1e-9);
        assert!(!settings.allow_missing_audio);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let toml_str = r#"
            deepl_api_key = "abc"
            [settings]
            tts_parallel = 8
            wordcards = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.deepl_api_key.as_deref(), Some("abc"));
        assert_eq!(config.settings.tts_parallel, 8);
        assert!(!config.settings.wordcards);
        // Unspecified fields keep defaults.
        assert_eq!(config.settings.translation_parallel, 4);
    }

    #[test]
    fn test_projects_dir_default() {
        let config = Config::default();
        assert_eq!(config.projects_dir(), PathBuf::from("projects"));
    }
}
