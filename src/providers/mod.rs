//! Provider adapters: a uniform async interface over translators and TTS
//! engines. Each adapter owns its rate limiter, retry policy, and response
//! validation; the orchestrator only sees the traits.

pub mod translate;
pub mod tts;

pub use translate::{DeepLTranslator, GoogleTranslator, OpenAiTranslator};
pub use tts::{GoogleCloudTts, GttsSynthesizer};

pub(crate) use translate::TRANSLATOR_LANGUAGES;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::Config;
use crate::error::{BilangError, Result};
use crate::quota::QuotaTracker;
use crate::ratelimit::RateLimiter;

/// Translation provider.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one text. Adapters short-circuit when source == target and
    /// pass empty strings through unchanged.
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// Translate several texts. Adapters may batch into one request; items
    /// that fail per-item validation are re-translated individually.
    async fn translate_batch(
        &self,
        texts: &[&str],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>>;

    /// Translate a single vocabulary word. Unlike sentences, an output
    /// identical to the input can be correct (loan words), so the
    /// byte-equality validation is relaxed here.
    async fn translate_word(&self, word: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.translate(word, source_lang, target_lang).await
    }

    fn supported_languages(&self) -> &[&'static str];

    fn name(&self) -> &'static str;
}

/// Result of one synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct Synthesis {
    pub duration_ms: u64,
}

/// Text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into `out_path` (MP3) and report the duration.
    async fn synthesize(&self, text: &str, lang: &str, out_path: &Path) -> Result<Synthesis>;

    fn supported_languages(&self) -> &[&'static str];

    fn name(&self) -> &'static str;

    /// Stable key identifying the voice configuration; part of the
    /// content-addressed artifact path.
    fn voice_key(&self) -> &'static str {
        self.name()
    }
}

/// Resolve a translator by provider name. Called once at pipeline
/// construction; no string dispatch happens after this.
pub fn create_translator(
    provider: &str,
    config: &Config,
    quota: Arc<QuotaTracker>,
) -> Result<Box<dyn Translator>> {
    match provider {
        "google" => Ok(Box::new(GoogleTranslator::new(quota))),
        "deepl-free" | "deepl-pro" => {
            let api_key = config.deepl_api_key.clone().ok_or_else(|| {
                BilangError::Input(
                    "DeepL API key not set. Set DEEPL_API_KEY environment variable.".to_string(),
                )
            })?;
            Ok(Box::new(DeepLTranslator::new(
                api_key,
                provider == "deepl-pro",
                quota,
            )))
        }
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                BilangError::Input(
                    "OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string(),
                )
            })?;
            Ok(Box::new(OpenAiTranslator::new(api_key)))
        }
        other => Err(BilangError::Input(format!(
            "Unknown translator provider: {other}. Use 'google', 'deepl-free', 'deepl-pro', or 'openai'"
        ))),
    }
}

/// Resolve a TTS engine by provider name.
pub fn create_synthesizer(
    provider: &str,
    config: &Config,
    quota: Arc<QuotaTracker>,
) -> Result<Box<dyn SpeechSynthesizer>> {
    match provider {
        "google_cloud" => {
            let api_key = config.google_tts_api_key.clone().ok_or_else(|| {
                BilangError::Input(
                    "Google Cloud TTS API key not set. Set GOOGLE_TTS_API_KEY environment variable."
                        .to_string(),
                )
            })?;
            Ok(Box::new(GoogleCloudTts::new(api_key, quota)))
        }
        "gtts" => Ok(Box::new(GttsSynthesizer::new(quota))),
        other => Err(BilangError::Input(format!(
            "Unknown TTS provider: {other}. Use 'google_cloud' or 'gtts'"
        ))),
    }
}

/// Shared retry loop: rate-limiter wait, call, report, backoff sleep.
/// Retryable errors are attempted up to `max_retries` extra times, then
/// escalated to `Permanent`. Non-retryable errors surface immediately.
pub(crate) async fn with_retries<T, F, Fut>(
    limiter: &RateLimiter,
    max_retries: u32,
    op_name: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = limiter.retry_delay(attempt - 1).await;
            tokio::time::sleep(delay).await;
        }
        limiter.wait().await;

        match call().await {
            Ok(value) => {
                limiter.report_success().await;
                return Ok(value);
            }
            Err(e) if e.is_retryable() => {
                limiter.report_error().await;
                warn!("{op_name} attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(BilangError::Permanent(format!(
        "{op_name} failed after {} retries: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Map an HTTP status to the error taxonomy.
pub(crate) fn status_error(op: &str, status: reqwest::StatusCode, body: &str) -> BilangError {
    if status.as_u16() == 429 {
        BilangError::RateLimited(format!("{op}: {status}"))
    } else if status.is_server_error() {
        BilangError::Transient(format!("{op}: {status}: {body}"))
    } else {
        BilangError::Permanent(format!("{op}: {status}: {body}"))
    }
}

/// Languages whose standard orthography is Cyrillic.
const CYRILLIC_LANGS: &[&str] = &["ru", "uk", "be", "bg", "sr", "mk"];

pub(crate) fn has_cyrillic(text: &str) -> bool {
    text.chars()
        .any(|c| ('а'..='я').contains(&c) || ('А'..='Я').contains(&c) || c == 'ё' || c == 'Ё')
}

/// Post-response validation shared by translator adapters. `allow_identical`
/// relaxes the byte-equality check for single-word lookups.
pub(crate) fn validate_translation(
    original: &str,
    translation: &str,
    source_lang: &str,
    target_lang: &str,
    allow_identical: bool,
) -> Result<()> {
    if translation.trim().is_empty() {
        return Err(BilangError::Validation("Empty translation".to_string()));
    }
    if !allow_identical && translation.trim() == original.trim() {
        return Err(BilangError::Validation(
            "Translation identical to input".to_string(),
        ));
    }
    // Translating out of Cyrillic must transliterate names, not copy them.
    let source_base = crate::lang::base_code(source_lang);
    let target_base = crate::lang::base_code(target_lang);
    if CYRILLIC_LANGS.contains(&source_base)
        && !CYRILLIC_LANGS.contains(&target_base)
        && has_cyrillic(translation)
    {
        return Err(BilangError::Validation(format!(
            "Cyrillic characters leaked into {target_lang} translation"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimiterConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            recovery_factor: 0.9,
            jitter: 0.0,
        })
    }

    #[tokio::test]
    async fn test_with_retries_succeeds_eventually() {
        let limiter = fast_limiter();
        let calls = AtomicU32::new(0);
        let result = with_retries(&limiter, 3, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BilangError::Transient("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_exhaustion_is_permanent() {
        let limiter = fast_limiter();
        let result: Result<()> = with_retries(&limiter, 2, "test", || async {
            Err(BilangError::RateLimited("always".to_string()))
        })
        .await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_with_retries_permanent_not_retried() {
        let limiter = fast_limiter();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(&limiter, 5, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BilangError::Permanent("no".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_validation_rejects_empty() {
        assert!(validate_translation("Привет", "", "ru", "es", false).is_err());
        assert!(validate_translation("Привет", "  ", "ru", "es", false).is_err());
    }

    #[test]
    fn test_validation_rejects_identical() {
        assert!(validate_translation("Привет", "Привет", "ru", "es", false).is_err());
        assert!(validate_translation("radar", "radar", "es", "en", true).is_ok());
    }

    #[test]
    fn test_validation_rejects_cyrillic_leak() {
        let result = validate_translation("Влэй пришёл", "Влэй llegó", "ru", "es", false);
        assert!(matches!(result, Err(BilangError::Validation(_))));
        assert!(validate_translation("Влэй пришёл", "Vley llegó", "ru", "es", false).is_ok());
        // Cyrillic target is fine.
        assert!(validate_translation("Hola", "Привет", "es", "ru", false).is_ok());
    }

    #[test]
    fn test_status_error_taxonomy() {
        use reqwest::StatusCode;
        assert!(matches!(
            status_error("t", StatusCode::TOO_MANY_REQUESTS, ""),
            BilangError::RateLimited(_)
        ));
        assert!(matches!(
            status_error("t", StatusCode::BAD_GATEWAY, ""),
            BilangError::Transient(_)
        ));
        assert!(matches!(
            status_error("t", StatusCode::UNAUTHORIZED, ""),
            BilangError::Permanent(_)
        ));
    }

    #[test]
    fn test_factory_unknown_provider() {
        let config = Config::default();
        let quota = Arc::new(QuotaTracker::open(
            tempfile::tempdir().unwrap().path().join("q.json"),
        ));
        assert!(create_translator("yandex", &config, quota.clone()).is_err());
        assert!(create_synthesizer("espeak", &config, quota).is_err());
    }

    #[test]
    fn test_factory_requires_keys() {
        let config = Config::default();
        let quota = Arc::new(QuotaTracker::open(
            tempfile::tempdir().unwrap().path().join("q.json"),
        ));
        assert!(create_translator("openai", &config, quota.clone()).is_err());
        assert!(create_translator("google", &config, quota.clone()).is_ok());
        assert!(create_synthesizer("gtts", &config, quota).is_ok());
    }
}
