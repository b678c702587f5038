//! Error types for the resilience core.
//!
//! Every failure a provider, the durable store or the local disk can produce
//! is mapped onto [`NexusError`]. The cascade and the cache use the helper
//! predicates here to decide whether to retry, move on, or degrade.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for resilience-core operations.
pub type NexusResult<T> = Result<T, NexusError>;

/// Error type for resilience-core operations.
#[derive(Debug, Error)]
pub enum NexusError {
    /// Configuration error (invalid threshold, base URL, missing key...).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Transient network/connection error.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// A call exceeded its deadline.
    #[error("Timed out after {timeout:?}: {message}")]
    Timeout {
        /// Error message.
        message: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Server error (5xx status codes).
    #[error("Server error (HTTP {status_code}): {message}")]
    Server {
        /// Error message.
        message: String,
        /// HTTP status code.
        status_code: u16,
    },

    /// The provider rejected the call with HTTP 429.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message.
        message: String,
        /// Server-provided wait, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials were rejected (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Error message from the provider.
        message: String,
    },

    /// Credentials lack permission (HTTP 403).
    #[error("Authorization failed: {message}")]
    Authorization {
        /// Error message from the provider.
        message: String,
    },

    /// The provider declined to answer.
    #[error("Content filtered by {provider}: {message}")]
    ContentFiltered {
        /// Provider that refused.
        provider: String,
        /// Refusal text or signature that matched.
        message: String,
    },

    /// The durable store could not be reached.
    #[error("Durable store unavailable: {message}")]
    DurableStoreUnavailable {
        /// Error message.
        message: String,
    },

    /// A circuit breaker rejected the call without trying it.
    #[error("Circuit breaker '{resource}' is open")]
    CircuitOpen {
        /// Name of the guarded resource.
        resource: String,
    },

    /// Every provider/model in the cascade failed.
    #[error("All providers exhausted; last error: {last_error}")]
    AllProvidersExhausted {
        /// Description of the final failure.
        last_error: String,
    },

    /// A response could not be parsed as JSON.
    #[error("Invalid JSON in response: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
        /// The raw response text.
        raw: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Local filesystem error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
    },

    /// Unexpected HTTP status.
    #[error("Unknown error (HTTP {status}): {message}")]
    Unknown {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl NexusError {
    /// Returns true if the same call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NexusError::RateLimited { .. }
                | NexusError::Server { .. }
                | NexusError::Timeout { .. }
                | NexusError::Network { .. }
                | NexusError::Unknown { .. }
        )
    }

    /// Returns true if the credentials are invalid for the provider.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            NexusError::Authentication { .. } | NexusError::Authorization { .. }
        )
    }

    /// Returns the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NexusError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        NexusError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a durable-store error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        NexusError::DurableStoreUnavailable {
            message: message.into(),
        }
    }

    /// Maps a non-2xx HTTP status and body onto the taxonomy.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = truncate(body, 200);
        match status {
            401 => NexusError::Authentication { message },
            403 => NexusError::Authorization { message },
            429 => NexusError::RateLimited {
                message,
                retry_after,
            },
            400 if mentions_content_filter(body) => NexusError::ContentFiltered {
                provider: String::new(),
                message,
            },
            500..=599 => NexusError::Server {
                message,
                status_code: status,
            },
            _ => NexusError::Unknown { status, message },
        }
    }
}

fn mentions_content_filter(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("content_filter") || lower.contains("content filter") || lower.contains("safety")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

impl From<reqwest::Error> for NexusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NexusError::Timeout {
                message: err.to_string(),
                timeout: Duration::ZERO,
            }
        } else if err.is_connect() {
            NexusError::Network {
                message: err.to_string(),
            }
        } else {
            NexusError::Unknown {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(err: serde_json::Error) -> Self {
        NexusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for NexusError {
    fn from(err: std::io::Error) -> Self {
        NexusError::Io {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for NexusError {
    fn from(err: url::ParseError) -> Self {
        NexusError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
