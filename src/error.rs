use thiserror::Error;

#[derive(Error, Debug)]
pub enum BilangError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permanent provider error: {0}")]
    Permanent(String),

    #[error("Audio processing failed: {0}")]
    Audio(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl BilangError {
    /// Whether an adapter retry loop should attempt this error again.
    ///
    /// Validation errors count as retryable: a bad translation or a
    /// zero-duration synthesis is usually fixed by asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BilangError::RateLimited(_) | BilangError::Transient(_) | BilangError::Validation(_) => {
                true
            }
            BilangError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BilangError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(BilangError::RateLimited("429".into()).is_retryable());
        assert!(BilangError::Transient("timeout".into()).is_retryable());
        assert!(BilangError::Validation("empty".into()).is_retryable());
        assert!(!BilangError::Permanent("quota".into()).is_retryable());
        assert!(!BilangError::Input("missing file".into()).is_retryable());
        assert!(!BilangError::UnsupportedLanguage("xx".into()).is_retryable());
    }
}
