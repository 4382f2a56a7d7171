pub mod deepl;
pub mod google;
pub mod openai;

pub use deepl::DeepLTranslator;
pub use google::GoogleTranslator;
pub use openai::OpenAiTranslator;

/// Internal language codes the bundled translators accept.
pub(crate) const TRANSLATOR_LANGUAGES: &[&str] =
    &["ru", "en", "en-gb", "es", "es-latam", "de", "fr", "pt-br"];
