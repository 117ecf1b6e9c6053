//! Error types for provider operations.

use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Error type for provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection, TLS, or HTTP-level failure before or during a stream.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// Whether retrying the request may succeed.
        retryable: bool,
    },

    /// Structured non-2xx response from the provider.
    #[error("provider error (HTTP {status}): {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied message.
        message: String,
        /// Whether the provider indicated the request can be retried.
        retryable: bool,
    },

    /// Malformed SSE framing, JSON, or event structure. Never retryable.
    #[error("decode error: {0}")]
    Decode(String),

    /// Authentication failed (bad or missing credentials).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Invalid provider configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            message: message.into(),
            retryable,
        }
    }

    /// Create a provider error from an HTTP status. Rate limits and server
    /// errors are retryable.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
            retryable: status == 429 || status >= 500,
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Provider { retryable, .. } => *retryable,
            Self::Decode(_) | Self::Auth(_) | Self::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Connect and timeout failures are worth retrying; body/decode
        // failures are not.
        let retryable = err.is_connect() || err.is_timeout();
        Self::Transport {
            message: err.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        assert!(ProviderError::status(429, "rate limited").is_retryable());
        assert!(ProviderError::status(500, "oops").is_retryable());
        assert!(ProviderError::status(503, "overloaded").is_retryable());
        assert!(!ProviderError::status(400, "bad request").is_retryable());
        assert!(!ProviderError::status(404, "no such model").is_retryable());
    }

    #[test]
    fn test_decode_never_retryable() {
        assert!(!ProviderError::Decode("bad json".into()).is_retryable());
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ProviderError::status(429, "slow down");
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("slow down"));
    }
}
