//! OpenAI chat-completions translator.
//!
//! JSON-mode responses keep the output machine-parseable (no "Here's your
//! translation..." preambles), batching cuts per-request overhead, and the
//! dialect prompts pin down voseo vs tuteo for the two Spanish variants.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{BilangError, Result};
use crate::lang::require_language;
use crate::providers::{
    status_error, validate_translation, with_retries, Translator, TRANSLATOR_LANGUAGES,
};
use crate::ratelimit::{RateLimiter, RateLimiterConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_RETRIES: u32 = 5;

const PROMPT_ES_LATAM: &str = "You translate literary text into Rioplatense (Latin American) Spanish.\n\
RULES:\n\
- VOSEO, not tuteo: vos tenés / querés / podés / sabés / sos.\n\
- Plural you is ustedes, never vosotros.\n\
- Local vocabulary: auto, celular, colectivo, computadora, acá/allá.\n\
- Simple past (comí), not compound (he comido).\n\
- ZERO Cyrillic characters in the output; transliterate names (Иван → Iván).\n\
Return ONLY JSON: {\"text\": \"...\"} for one input, {\"translations\": [...]} for a list.";

const PROMPT_ES: &str = "You translate literary text into European (Castilian) Spanish.\n\
RULES:\n\
- TUTEO: tú tienes / quieres / puedes; plural vosotros.\n\
- Peninsular vocabulary: coche, móvil, ordenador, piso, aquí/allí.\n\
- ZERO Cyrillic characters in the output; transliterate names (Иван → Iván).\n\
Return ONLY JSON: {\"text\": \"...\"} for one input, {\"translations\": [...]} for a list.";

const PROMPT_EN: &str = "You translate literary text into natural, fluent English.\n\
Preserve tone and style; transliterate names (Иван → Ivan). ZERO Cyrillic in the output.\n\
Return ONLY JSON: {\"text\": \"...\"} for one input, {\"translations\": [...]} for a list.";

const PROMPT_WORDS: &str = "You are a bilingual dictionary translating individual words.\n\
Translate the word itself with its most common meaning; keep it short (one word or a short phrase).\n\
Nouns get noun translations, verbs get infinitives. Never return an empty translation.\n\
Return ONLY JSON: {\"text\": \"...\"}.";

pub struct OpenAiTranslator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
    limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiTranslator {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            batch_size: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            limiter: RateLimiter::new(RateLimiterConfig {
                min_delay: Duration::from_millis(100),
                ..Default::default()
            }),
        }
    }

    /// Point the adapter at a different host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn system_prompt(&self, source_lang: &str, target_lang: &str) -> String {
        match target_lang {
            "es-latam" => PROMPT_ES_LATAM.to_string(),
            "es" => PROMPT_ES.to_string(),
            "en" | "en-gb" => PROMPT_EN.to_string(),
            other => {
                let name = crate::lang::get_language(other)
                    .map(|l| l.name)
                    .unwrap_or(other);
                format!(
                    "You translate literary text from {source_lang} into {name}. \
                     Preserve tone and style. Return ONLY JSON: {{\"text\": \"...\"}} for one \
                     input, {{\"translations\": [...]}} for a list."
                )
            }
        }
    }

    async fn chat(&self, system: &str, user: String) -> Result<serde_json::Value> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.3,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| BilangError::Transient(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error("OpenAI", status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| BilangError::Transient(format!("Unparseable OpenAI response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BilangError::Transient("Empty OpenAI response".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| BilangError::Validation(format!("OpenAI returned non-JSON content: {e}")))
    }

    async fn translate_inner(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        system: &str,
        allow_identical: bool,
    ) -> Result<String> {
        if source_lang == target_lang || text.trim().is_empty() {
            return Ok(text.to_string());
        }
        require_language(source_lang)?;
        require_language(target_lang)?;

        with_retries(&self.limiter, self.max_retries, "OpenAI translate", || async {
            let value = self.chat(system, text.to_string()).await?;
            let candidate = value
                .get("text")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    BilangError::Validation("OpenAI response missing 'text' field".to_string())
                })?
                .trim()
                .to_string();
            validate_translation(text, &candidate, source_lang, target_lang, allow_identical)?;
            Ok(candidate)
        })
        .await
    }

    async fn translate_chunk(
        &self,
        texts: &[&str],
        source_lang: &str,
        target_lang: &str,
        system: &str,
    ) -> Result<Vec<String>> {
        let user = serde_json::to_string(&json!({ "texts": texts }))?;
        let batch = with_retries(&self.limiter, self.max_retries, "OpenAI batch", || async {
            let value = self.chat(system, user.clone()).await?;
            let translations = value
                .get("translations")
                .and_then(serde_json::Value::as_array)
                .ok_or_else(|| {
                    BilangError::Validation("OpenAI response missing 'translations'".to_string())
                })?;
            if translations.len() != texts.len() {
                return Err(BilangError::Validation(format!(
                    "OpenAI returned {} translations for {} texts",
                    translations.len(),
                    texts.len()
                )));
            }
            Ok(translations
                .iter()
                .map(|t| t.as_str().unwrap_or_default().trim().to_string())
                .collect::<Vec<_>>())
        })
        .await?;

        // Per-item validation; failures fall back to individual calls.
        let mut results = Vec::with_capacity(texts.len());
        for (text, candidate) in texts.iter().zip(batch) {
            match validate_translation(text, &candidate, source_lang, target_lang, false) {
                Ok(()) => results.push(candidate),
                Err(e) => {
                    warn!("Batch item failed validation ({e}); retrying individually");
                    results.push(
                        self.translate_inner(text, source_lang, target_lang, system, false)
                            .await?,
                    );
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let system = self.system_prompt(source_lang, target_lang);
        self.translate_inner(text, source_lang, target_lang, &system, false)
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
        require_language(source_lang)?;
        require_language(target_lang)?;

        let system = self.system_prompt(source_lang, target_lang);
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!("Translating batch of {} texts", chunk.len());
            results.extend(
                self.translate_chunk(chunk, source_lang, target_lang, &system)
                    .await?,
            );
        }
        Ok(results)
    }

    async fn translate_word(&self, word: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.translate_inner(word, source_lang, target_lang, PROMPT_WORDS, true)
            .await
    }

    fn supported_languages(&self) -> &[&'static str] {
        TRANSLATOR_LANGUAGES
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content.to_string()}}]
        })
    }

    #[test]
    fn test_dialect_prompts() {
        let t = OpenAiTranslator::new("k".to_string());
        assert!(t.system_prompt("ru", "es-latam").contains("VOSEO"));
        assert!(t.system_prompt("ru", "es").contains("TUTEO"));
        assert!(t.system_prompt("ru", "en").contains("English"));
        assert!(t.system_prompt("ru", "de").contains("German"));
    }

    #[tokio::test]
    async fn test_translate_via_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(json!({"text": "Hola mundo"}))),
            )
            .mount(&server)
            .await;

        let result = OpenAiTranslator::new("k".to_string())
            .with_base_url(server.uri())
            .translate("Привет мир", "ru", "es")
            .await
            .unwrap();
        assert_eq!(result, "Hola mundo");
    }

    #[tokio::test]
    async fn test_batch_via_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(json!({"translations": ["Uno", "Dos"]}))),
            )
            .mount(&server)
            .await;

        let result = OpenAiTranslator::new("k".to_string())
            .with_base_url(server.uri())
            .translate_batch(&["Один", "Два"], "ru", "es")
            .await
            .unwrap();
        assert_eq!(result, vec!["Uno", "Dos"]);
    }

    #[tokio::test]
    async fn test_cyrillic_leak_retried_then_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(json!({"text": "Влэй llegó"}))),
            )
            .mount(&server)
            .await;

        let result = OpenAiTranslator::new("k".to_string())
            .with_base_url(server.uri())
            .with_max_retries(1)
            .translate("Влэй пришёл", "ru", "es")
            .await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_auth_failure_is_permanent_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let result = OpenAiTranslator::new("bad".to_string())
            .with_base_url(server.uri())
            .translate("Привет", "ru", "es")
            .await;
        assert!(matches!(result, Err(BilangError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_word_translation_allows_identical() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body(json!({"text": "radar"}))),
            )
            .mount(&server)
            .await;

        let result = OpenAiTranslator::new("k".to_string())
            .with_base_url(server.uri())
            .translate_word("radar", "es", "en")
            .await
            .unwrap();
        assert_eq!(result, "radar");
    }
}
