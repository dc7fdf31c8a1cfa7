use thiserror::Error;

/// Phrases a provider uses in its error body when it is throttling us.
const RATE_LIMIT_MARKERS: [&str; 4] = ["rate limit", "429", "too many requests", "quota exceeded"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocoderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Already carries the "provider error: ..." prefix.
    #[error("{message}")]
    Provider { status: Option<u16>, message: String },

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(String),
}

/// How the retry layer should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient throttling; eligible for retry.
    RateLimit,
    /// Fails this item only.
    Permanent,
    /// Aborts the whole batch before it starts.
    Fatal,
}

impl GeocoderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GeocoderError::RateLimited(_) => FailureKind::RateLimit,
            GeocoderError::Config(_) => FailureKind::Fatal,
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == FailureKind::RateLimit
    }

    /// Builds a provider failure, promoting it to `RateLimited` when the
    /// provider's own wording says it is throttling.
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            GeocoderError::RateLimited(message)
        } else {
            GeocoderError::Provider { status, message }
        }
    }

    /// Failure below the HTTP layer. Never retried: the text may carry the
    /// request URL, so it is not matched against the throttling phrases.
    pub fn transport(message: impl Into<String>) -> Self {
        GeocoderError::Transport(message.into())
    }
}

/// Case-insensitive match against the known throttling phrases.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m))
}

impl From<std::io::Error> for GeocoderError {
    fn from(err: std::io::Error) -> Self {
        GeocoderError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GeocoderError {
    fn from(err: serde_json::Error) -> Self {
        GeocoderError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for GeocoderError {
    fn from(err: toml::de::Error) -> Self {
        GeocoderError::Toml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeocoderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_markers_are_case_insensitive() {
        assert!(is_rate_limit_message("Rate Limit exceeded"));
        assert!(is_rate_limit_message("HTTP 429"));
        assert!(is_rate_limit_message("TOO MANY REQUESTS"));
        assert!(is_rate_limit_message("daily Quota Exceeded for key"));
        assert!(!is_rate_limit_message("provider error: 500"));
    }

    #[test]
    fn test_provider_promotes_throttling_wording() {
        let err = GeocoderError::provider(Some(403), "provider error: quota exceeded");
        assert_eq!(err.kind(), FailureKind::RateLimit);

        let err = GeocoderError::provider(Some(500), "provider error: 500");
        assert_eq!(err.kind(), FailureKind::Permanent);
        assert_eq!(err.to_string(), "provider error: 500");
    }

    #[test]
    fn test_transport_text_is_not_classified() {
        let err = GeocoderError::transport(
            "error sending request for url (https://geo.example.test/?address=Pelak+1429): operation timed out",
        );
        assert!(matches!(err, GeocoderError::Transport(_)));
        assert_eq!(err.kind(), FailureKind::Permanent);
    }

    #[test]
    fn test_config_is_fatal() {
        let err = GeocoderError::Config("API key is not configured".into());
        assert_eq!(err.kind(), FailureKind::Fatal);
        assert!(!err.is_rate_limited());
    }
}
