//! Free Google Translate TTS endpoint.
//!
//! No API key and no character quota, but it only offers one voice per base
//! language and throttles hard, so the limiter starts conservative.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::audio::{probe_duration_ms, validate_audio_file};
use crate::error::{BilangError, Result};
use crate::lang::require_language;
use crate::providers::{status_error, with_retries, SpeechSynthesizer, Synthesis};
use crate::quota::QuotaTracker;
use crate::ratelimit::{RateLimiter, RateLimiterConfig};

const DEFAULT_BASE_URL: &str = "https://translate.google.com";
const DEFAULT_MAX_RETRIES: u32 = 5;

const SUPPORTED: &[&str] = &["ru", "en", "en-gb", "es", "es-latam", "de", "fr", "pt-br"];

pub struct GttsSynthesizer {
    client: Client,
    base_url: String,
    max_retries: u32,
    validate: bool,
    limiter: RateLimiter,
    quota: Arc<QuotaTracker>,
}

impl GttsSynthesizer {
    pub fn new(quota: Arc<QuotaTracker>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            validate: true,
            limiter: RateLimiter::new(RateLimiterConfig {
                min_delay: Duration::from_millis(300),
                initial_delay: Duration::from_millis(300),
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

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Skip the ffprobe validation of synthesized files. For tests.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    async fn request(&self, text: &str, tl: &str) -> Result<Vec<u8>> {
        let url = format!("{}/translate_tts", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", tl),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| BilangError::Transient(format!("gTTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("gTTS", status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BilangError::Transient(format!("gTTS body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GttsSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str, out_path: &Path) -> Result<Synthesis> {
        if text.trim().is_empty() {
            return Err(BilangError::Validation(
                "Refusing to synthesize empty text".to_string(),
            ));
        }
        // gTTS does not distinguish regional variants.
        let tl = require_language(lang)?.wordfreq_code;

        let duration_ms = with_retries(&self.limiter, self.max_retries, "gTTS", || async {
            let audio = self.request(text, tl).await?;
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out_path, &audio)?;

            if self.validate {
                validate_audio_file(out_path, 0.1)?;
                probe_duration_ms(out_path)
            } else {
                Ok(0)
            }
        })
        .await?;

        self.quota.add_usage("gtts", text.chars().count() as u64);
        debug!("gTTS synthesized {} chars -> {}", text.chars().count(), out_path.display());
        Ok(Synthesis { duration_ms })
    }

    fn supported_languages(&self) -> &[&'static str] {
        SUPPORTED
    }

    fn name(&self) -> &'static str {
        "gtts"
    }
}
