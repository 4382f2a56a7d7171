//! DeepL translator, free and pro tiers.
//!
//! Same wire protocol on both tiers, different host and quota bucket. The
//! free tier hard-stops at 500k characters/month, which the quota tracker
//! surfaces before DeepL starts answering 456.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{BilangError, Result};
use crate::lang::base_code;
use crate::providers::{
    status_error, validate_translation, with_retries, Translator, TRANSLATOR_LANGUAGES,
};
use crate::quota::QuotaTracker;
use crate::ratelimit::{RateLimiter, RateLimiterConfig};

const FREE_BASE_URL: &str = "https://api-free.deepl.com";
const PRO_BASE_URL: &str = "https://api.deepl.com";
const DEFAULT_MAX_RETRIES: u32 = 5;

pub struct DeepLTranslator {
    client: Client,
    api_key: String,
    pro: bool,
    base_url: String,
    max_retries: u32,
    limiter: RateLimiter,
    quota: Arc<QuotaTracker>,
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

impl DeepLTranslator {
    pub fn new(api_key: String, pro: bool, quota: Arc<QuotaTracker>) -> Self {
        let base_url = if pro { PRO_BASE_URL } else { FREE_BASE_URL };
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
            pro,
            base_url: base_url.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            limiter: RateLimiter::new(RateLimiterConfig {
                min_delay: Duration::from_millis(500),
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

    fn quota_service(&self) -> &'static str {
        if self.pro {
            "deepl_pro"
        } else {
            "deepl_free"
        }
    }

    async fn request(&self, texts: &[&str], sl: &str, tl: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/translate", self.base_url);
        let mut form: Vec<(&str, String)> = vec![
            ("auth_key", self.api_key.clone()),
            ("source_lang", sl.to_string()),
            ("target_lang", tl.to_string()),
        ];
        for text in texts {
            form.push(("text", (*text).to_string()));
        }

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| BilangError::Transient(format!("DeepL request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 456 {
            return Err(BilangError::Permanent(
                "DeepL character quota exhausted".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(status_error("DeepL", status, &body));
        }

        let parsed: DeepLResponse = serde_json::from_str(&body)
            .map_err(|e| BilangError::Transient(format!("Unparseable DeepL response: {e}")))?;
        if parsed.translations.len() != texts.len() {
            return Err(BilangError::Validation(format!(
                "DeepL returned {} translations for {} texts",
                parsed.translations.len(),
                texts.len()
            )));
        }
        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
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
        let sl = deepl_source_code(source_lang)?;
        let tl = deepl_target_code(target_lang)?;

        let translation = with_retries(&self.limiter, self.max_retries, "DeepL", || async {
            let mut results = self.request(&[text], &sl, &tl).await?;
            let candidate = results.pop().unwrap_or_default();
            validate_translation(text, &candidate, source_lang, target_lang, allow_identical)?;
            Ok(candidate)
        })
        .await?;

        self.quota
            .add_usage(self.quota_service(), text.chars().count() as u64);
        debug!("DeepL translated {} chars {}->{}", text.len(), sl, tl);
        Ok(translation)
    }
}

/// DeepL source codes are plain uppercase base languages.
fn deepl_source_code(lang: &str) -> Result<String> {
    let lang = crate::lang::require_language(lang)?;
    Ok(base_code(lang.code).to_uppercase())
}

/// Target codes keep the region where DeepL distinguishes one.
fn deepl_target_code(lang: &str) -> Result<String> {
    let lang = crate::lang::require_language(lang)?;
    Ok(match lang.code {
        "en-gb" => "EN-GB".to_string(),
        "en" => "EN-US".to_string(),
        "pt-br" => "PT-BR".to_string(),
        other => base_code(other).to_uppercase(),
    })
}

#[async_trait]
impl Translator for DeepLTranslator {
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
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if source_lang == target_lang {
            return Ok(texts.iter().map(|t| t.to_string()).collect());
        }
        let sl = deepl_source_code(source_lang)?;
        let tl = deepl_target_code(target_lang)?;

        let batch = with_retries(&self.limiter, self.max_retries, "DeepL batch", || async {
            self.request(texts, &sl, &tl).await
        })
        .await?;

        // Items failing validation get one individual second chance; the
        // whole batch is never silently padded.
        let mut results = Vec::with_capacity(texts.len());
        for (text, candidate) in texts.iter().zip(batch) {
            match validate_translation(text, &candidate, source_lang, target_lang, false) {
                Ok(()) => results.push(candidate),
                Err(e) => {
                    warn!("Batch item failed validation ({e}); retrying individually");
                    results.push(self.translate(text, source_lang, target_lang).await?);
                }
            }
        }

        let chars: u64 = texts.iter().map(|t| t.chars().count() as u64).sum();
        self.quota.add_usage(self.quota_service(), chars);
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
        if self.pro {
            "deepl-pro"
        } else {
            "deepl-free"
        }
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

    fn translator(base: &str) -> DeepLTranslator {
        DeepLTranslator::new("key".to_string(), false, tracker()).with_base_url(base)
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(deepl_source_code("ru").unwrap(), "RU");
        assert_eq!(deepl_source_code("es-latam").unwrap(), "ES");
        assert_eq!(deepl_target_code("pt-br").unwrap(), "PT-BR");
        assert_eq!(deepl_target_code("en").unwrap(), "EN-US");
        assert_eq!(deepl_target_code("es").unwrap(), "ES");
        assert!(deepl_target_code("xx").is_err());
    }

    #[tokio::test]
    async fn test_translate_via_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [{"detected_source_language": "RU", "text": "Hola mundo"}]
            })))
            .mount(&server)
            .await;

        let result = translator(&server.uri())
            .translate("Привет мир", "ru", "es")
            .await
            .unwrap();
        assert_eq!(result, "Hola mundo");
    }

    #[tokio::test]
    async fn test_batch_via_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [{"text": "Uno"}, {"text": "Dos"}]
            })))
            .mount(&server)
            .await;

        let result = translator(&server.uri())
            .translate_batch(&["Один", "Два"], "ru", "es")
            .await
            .unwrap();
        assert_eq!(result, vec!["Uno", "Dos"]);
    }

    #[tokio::test]
    async fn test_quota_exhausted_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(456))
            .mount(&server)
            .await;

        let result = translator(&server.uri()).translate("Привет", "ru", "es").await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [{"text": "Uno"}]
            })))
            .mount(&server)
            .await;

        // Two inputs, one output: validation error, retried, then permanent.
        let result = translator(&server.uri())
            .with_max_retries(1)
            .translate_batch(&["Один", "Два"], "ru", "es")
            .await;
        assert!(result.is_err());
    }
}
