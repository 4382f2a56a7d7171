//! Language registry.
//!
//! Centralizes the codes the rest of the crate uses so that `es` (European
//! Spanish) and `es-latam` (Rioplatense) never get conflated, and so that
//! provider-specific naming (TTS locales, frequency-list codes) lives in one
//! table. Unknown codes are rejected with `UnsupportedLanguage` — never
//! silently mapped to a default.

use crate::error::{BilangError, Result};

/// Language definition with all naming variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    /// Internal code used in project slugs and the store.
    pub code: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// TTS locale code (Google Cloud style).
    pub tts_code: &'static str,
    /// Code used by frequency tables.
    pub wordfreq_code: &'static str,
}

pub const LANGUAGES: &[Language] = &[
    Language { code: "ru", name: "Russian", tts_code: "ru-RU", wordfreq_code: "ru" },
    Language { code: "en", name: "English", tts_code: "en-US", wordfreq_code: "en" },
    Language { code: "en-gb", name: "English (UK)", tts_code: "en-GB", wordfreq_code: "en" },
    Language { code: "es", name: "Spanish", tts_code: "es-ES", wordfreq_code: "es" },
    Language { code: "es-latam", name: "Spanish (Latin America)", tts_code: "es-US", wordfreq_code: "es" },
    Language { code: "de", name: "German", tts_code: "de-DE", wordfreq_code: "de" },
    Language { code: "fr", name: "French", tts_code: "fr-FR", wordfreq_code: "fr" },
    Language { code: "pt-br", name: "Portuguese (Brazil)", tts_code: "pt-BR", wordfreq_code: "pt" },
];

/// Aliases accepted on input and normalized to a registry code.
const ALIASES: &[(&str, &str)] = &[
    ("es-ar", "es-latam"),
    ("es-us", "es-latam"),
    ("es-es", "es"),
    ("en-us", "en"),
    ("pt", "pt-br"),
];

/// Look up a language by code or alias. Case-insensitive.
pub fn get_language(code: &str) -> Option<&'static Language> {
    let lower = code.to_lowercase();
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, c)| *c)
        .unwrap_or(&lower);
    LANGUAGES.iter().find(|l| l.code == canonical)
}

/// Look up a language, failing with `UnsupportedLanguage` if unknown.
pub fn require_language(code: &str) -> Result<&'static Language> {
    get_language(code).ok_or_else(|| BilangError::UnsupportedLanguage(code.to_string()))
}

/// Base code with any regional suffix stripped (`es-latam` -> `es`).
/// Used where variants share data, e.g. stopword and abbreviation tables.
pub fn base_code(code: &str) -> &str {
    code.split('-').next().unwrap_or(code)
}
