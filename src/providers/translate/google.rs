//! Free Google Translate web endpoint.
//!
//! No API key, but aggressively rate limited server-side, so the adapter
//! leans on the adaptive limiter: slow down on errors, speed back up on
//! success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::{BilangError, Result};
use crate::lang::require_language;
use crate::providers::{
    status_error, validate_translation, with_retries, Translator, TRANSLATOR_LANGUAGES,
};
use crate::quota::QuotaTracker;
use crate::ratelimit::{RateLimiter, RateLimiterConfig};

const DEFAULT_BASE_URL: &str = "https://translate.googleapis.com";
const MAX_RETRIES: u32 = 5;

pub struct GoogleTranslator {
    client: Client,
    base_url: String,
    limiter: RateLimiter,
    quota: Arc<QuotaTracker>,
}

impl GoogleTranslator {
    pub fn new(quota: Arc<QuotaTracker>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter: RateLimiter::new(RateLimiterConfig {
                min_delay: Duration::from_millis(300),
                initial_delay: Duration::from_millis(500),
                recovery_factor: 0.95,
                ..Default::default()
            }),
            quota,
        }
    }

    /// Point the adapter at a different host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(&self, text: &str, sl: &str, tl: &str) -> Result<String> {
        let url = format!("{}/translate_a/single", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("client", "gtx"),
                ("sl", sl),
                ("tl", tl),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BilangError::Transient(format!("Google translate timeout: {e}"))
                } else {
                    BilangError::Transient(format!("Google translate request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error("Google translate", status, &body));
        }

        parse_response(&body)
    }

    async fn translate_inner(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        allow_identical: bool,
    ) -> Result<String> {
        if source_lang == target_lang || text.trim().is_empty() {
            return Ok(text.to_string());
        }
        let sl = require_language(source_lang)?.wordfreq_code;
        let tl = require_language(target_lang)?.wordfreq_code;

        let translation = with_retries(&self.limiter, MAX_RETRIES, "Google translate", || async {
            let candidate = self.request(text, sl, tl).await?;
            validate_translation(text, &candidate, source_lang, target_lang, allow_identical)?;
            Ok(candidate)
        })
        .await?;

        self.quota
            .add_usage("google_translate", text.chars().count() as u64);
        debug!("Translated {} chars {}->{}", text.len(), sl, tl);
        Ok(translation)
    }
}

/// The endpoint answers with nested arrays: the first element holds the
/// translated segments, each segment's first element being the text.
fn parse_response(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| BilangError::Transient(format!("Unparseable translate response: {e}")))?;

    let segments = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| BilangError::Transient("Unexpected translate response shape".to_string()))?;

    let mut out = String::new();
    for segment in segments {
        if let Some(chunk) = segment.get(0).and_then(Value::as_str) {
            out.push_str(chunk);
        }
    }
    Ok(out)
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.translate_inner(text, source_lang, target_lang, false)
            .await
    }

    async fn translate_batch(
        &self,
        texts: &[&str],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        // The free endpoint has no batch form; requests go out one by one
        // under the shared limiter.
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.translate(text, source_lang, target_lang).await?);
        }
        Ok(results)
    }

    async fn translate_word(&self, word: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.translate_inner(word, source_lang, target_lang, true)
            .await
    }

    fn supported_languages(&self) -> &[&'static str] {
        TRANSLATOR_LANGUAGES
    }

    fn name(&self) -> &'static str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<QuotaTracker> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(QuotaTracker::open(dir.path().join("quota.json")))
    }

    #[test]
    fn test_parse_response() {
        let body = r#"[[["Hola mundo","Hello world",null,null,10]],null,"en"]"#;
        assert_eq!(parse_response(body).unwrap(), "Hola mundo");
    }

    #[test]
    fn test_parse_response_multi_segment() {
        let body = r#"[[["Hola. ","Hello. "],["Adiós.","Goodbye."]],null,"en"]"#;
        assert_eq!(parse_response(body).unwrap(), "Hola. Adiós.");
    }

    #[test]
    fn test_parse_response_garbage() {
        assert!(parse_response("<html>").is_err());
        assert!(parse_response("{}").is_err());
    }

    #[tokio::test]
    async fn test_same_language_short_circuit() {
        let translator = GoogleTranslator::new(tracker());
        let result = translator.translate("Привет", "ru", "ru").await.unwrap();
        assert_eq!(result, "Привет");
    }

    #[tokio::test]
    async fn test_empty_passthrough() {
        let translator = GoogleTranslator::new(tracker());
        assert_eq!(translator.translate("", "ru", "es").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let translator = GoogleTranslator::new(tracker());
        let result = translator.translate("hi", "en", "xx").await;
        assert!(matches!(result, Err(BilangError::UnsupportedLanguage(_))));
    }

    #[test]
    fn test_name_and_languages() {
        let translator = GoogleTranslator::new(tracker());
        assert_eq!(translator.name(), "google");
        assert!(translator.supported_languages().contains(&"es-latam"));
    }
}
