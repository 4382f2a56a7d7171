//! Google Cloud Text-to-Speech over the REST API.
//!
//! Standard voices only (cheaper, and fine for audiobooks). The voice map
//! pins each language variant to a concrete voice; `es` and `es-latam` are
//! different languages here, not accents of one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::audio::{probe_duration_ms, validate_audio_file};
use crate::error::{BilangError, Result};
use crate::providers::{status_error, with_retries, SpeechSynthesizer, Synthesis};
use crate::quota::QuotaTracker;
use crate::ratelimit::{RateLimiter, RateLimiterConfig};

const DEFAULT_BASE_URL: &str = "https://texttospeech.googleapis.com";
const DEFAULT_MAX_RETRIES: u32 = 5;

/// `key -> (languageCode, voice name)`. `-m` suffixed keys pick male voices.
const VOICE_MAP: &[(&str, &str, &str)] = &[
    ("ru", "ru-RU", "ru-RU-Standard-A"),
    ("ru-m", "ru-RU", "ru-RU-Standard-B"),
    ("es", "es-ES", "es-ES-Standard-A"),
    ("es-m", "es-ES", "es-ES-Standard-B"),
    ("es-latam", "es-US", "es-US-Standard-A"),
    ("es-latam-m", "es-US", "es-US-Standard-B"),
    ("en", "en-US", "en-US-Standard-C"),
    ("en-m", "en-US", "en-US-Standard-B"),
    ("en-gb", "en-GB", "en-GB-Standard-A"),
    ("en-gb-m", "en-GB", "en-GB-Standard-B"),
    ("pt-br", "pt-BR", "pt-BR-Standard-A"),
    ("de", "de-DE", "de-DE-Standard-A"),
    ("fr", "fr-FR", "fr-FR-Standard-A"),
];

const SUPPORTED: &[&str] = &["ru", "en", "en-gb", "es", "es-latam", "de", "fr", "pt-br"];

pub struct GoogleCloudTts {
    client: Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    validate: bool,
    limiter: RateLimiter,
    quota: Arc<QuotaTracker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

impl GoogleCloudTts {
    pub fn new(api_key: String, quota: Arc<QuotaTracker>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            validate: true,
            limiter: RateLimiter::new(RateLimiterConfig {
                min_delay: Duration::from_millis(100),
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

    /// Skip the ffprobe validation of synthesized files. For tests where no
    /// real audio comes back.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    async fn request(&self, text: &str, language_code: &str, voice: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/text:synthesize", self.base_url);
        let request = json!({
            "input": {"text": text},
            "voice": {"languageCode": language_code, "name": voice},
            "audioConfig": {"audioEncoding": "MP3"},
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| BilangError::Transient(format!("Cloud TTS request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error("Cloud TTS", status, &body));
        }

        let parsed: SynthesizeResponse = serde_json::from_str(&body)
            .map_err(|e| BilangError::Transient(format!("Unparseable Cloud TTS response: {e}")))?;
        base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_content)
            .map_err(|e| BilangError::Validation(format!("Invalid audio payload: {e}")))
    }
}

/// Resolve a voice for a language key (internal code, optionally with a
/// `-m` male suffix). Unknown keys are an error, never a default voice.
fn voice_for(lang: &str) -> Result<(&'static str, &'static str)> {
    let lower = lang.to_lowercase();
    if let Some((_, code, name)) = VOICE_MAP.iter().find(|(key, _, _)| *key == lower) {
        return Ok((code, name));
    }
    // Alias like es-ar resolves through the registry, then into the map.
    let canonical = crate::lang::require_language(&lower)?.code;
    VOICE_MAP
        .iter()
        .find(|(key, _, _)| *key == canonical)
        .map(|(_, code, name)| (*code, *name))
        .ok_or_else(|| BilangError::UnsupportedLanguage(lang.to_string()))
}

#[async_trait]
impl SpeechSynthesizer for GoogleCloudTts {
    async fn synthesize(&self, text: &str, lang: &str, out_path: &Path) -> Result<Synthesis> {
        if text.trim().is_empty() {
            return Err(BilangError::Validation(
                "Refusing to synthesize empty text".to_string(),
            ));
        }
        let (language_code, voice) = voice_for(lang)?;

        let duration_ms = with_retries(&self.limiter, self.max_retries, "Cloud TTS", || async {
            let audio = self.request(text, language_code, voice).await?;
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

        self.quota
            .add_usage("google_tts", text.chars().count() as u64);
        debug!(
            "Synthesized {} chars with {} -> {}",
            text.chars().count(),
            voice,
            out_path.display()
        );
        Ok(Synthesis { duration_ms })
    }

    fn supported_languages(&self) -> &[&'static str] {
        SUPPORTED
    }

    fn name(&self) -> &'static str {
        "google_cloud"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tracker() -> Arc<QuotaTracker> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(QuotaTracker::open(dir.path().join("quota.json")))
    }

    #[test]
    fn test_voice_map_lookup() {
        assert_eq!(voice_for("ru").unwrap().1, "ru-RU-Standard-A");
        assert_eq!(voice_for("ru-m").unwrap().1, "ru-RU-Standard-B");
        assert_eq!(voice_for("es-latam").unwrap().0, "es-US");
        assert_eq!(voice_for("es").unwrap().0, "es-ES");
        // Alias goes through the registry.
        assert_eq!(voice_for("es-ar").unwrap().0, "es-US");
        assert!(voice_for("xx").is_err());
    }

    #[tokio::test]
    async fn test_synthesize_via_mock() {
        let server = MockServer::start().await;
        let audio = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 4096]);
        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"audioContent": audio})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let tts = GoogleCloudTts::new("key".to_string(), tracker())
            .with_base_url(server.uri())
            .without_validation();

        tts.synthesize("Привет мир", "ru", &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let tts = GoogleCloudTts::new("key".to_string(), tracker());
        let result = tts.synthesize("  ", "ru", Path::new("/tmp/x.mp3")).await;
        assert!(matches!(result, Err(BilangError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let tts = GoogleCloudTts::new("key".to_string(), tracker());
        let result = tts.synthesize("hi", "xx", Path::new("/tmp/x.mp3")).await;
        assert!(matches!(result, Err(BilangError::UnsupportedLanguage(_))));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = GoogleCloudTts::new("key".to_string(), tracker())
            .with_base_url(server.uri())
            .with_max_retries(1)
            .without_validation();

        let result = tts
            .synthesize("Привет", "ru", &dir.path().join("x.mp3"))
            .await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
    }
}
