/// Shared error type used across all Valet crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("storage: {0}")]
    Storage(String),

    #[error("schedule: {0}")]
    Schedule(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is the model refusing to continue a response
    /// on content-policy grounds. The turn loop recovers from these;
    /// every other provider error propagates to the transport.
    pub fn is_content_filter(&self) -> bool {
        match self {
            Error::Provider { message, .. } => {
                let lower = message.to_ascii_lowercase();
                lower.contains("content filter") || lower.contains("content filtering")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_filter_detected_on_provider_errors() {
        let err = Error::Provider {
            provider: "anthropic".into(),
            message: "HTTP 400 - Output blocked by content filtering policy".into(),
        };
        assert!(err.is_content_filter());
    }

    #[test]
    fn other_provider_errors_are_not_content_filter() {
        let err = Error::Provider {
            provider: "anthropic".into(),
            message: "HTTP 429 - Rate limit exceeded".into(),
        };
        assert!(!err.is_content_filter());

        assert!(!Error::Timeout("stream stalled".into()).is_content_filter());
    }
}
