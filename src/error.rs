use thiserror::Error;

/// Failure modes of the generation core.
///
/// Transport-class errors (`RateLimited`, `UpstreamHttp`, `Network`, `Timeout`)
/// and `EmptyGeneration` are retried by [`crate::retry::run_with_backoff`];
/// the rest surface immediately.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("{provider} rate limit exceeded (HTTP 429): {body}")]
    RateLimited { provider: &'static str, body: String },

    #[error("{provider} error: HTTP {status}: {body}")]
    UpstreamHttp {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {source}")]
    Network {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: {reason}")]
    EmptyGeneration {
        provider: &'static str,
        reason: String,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} API key not set")]
    MissingApiKey(&'static str),
}

impl GenerationError {
    pub fn from_status(provider: &'static str, status: u16, body: String) -> Self {
        if status == 429 {
            Self::RateLimited { provider, body }
        } else {
            Self::UpstreamHttp {
                provider,
                status,
                body,
            }
        }
    }

    pub fn from_reqwest(provider: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Network { provider, source }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::UpstreamHttp { .. }
                | Self::Network { .. }
                | Self::Timeout { .. }
                | Self::EmptyGeneration { .. }
        )
    }

    /// Rejected before any upstream call was made.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::MissingApiKey(_))
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
