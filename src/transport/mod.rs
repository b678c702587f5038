//! HTTP transport layer.
//!
//! Provides the HTTP transport abstraction used by the provider handlers and
//! the REST durable store, and a reqwest-backed implementation.

mod http;

pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, HttpTransportImpl};

use std::time::Duration;

use crate::errors::NexusError;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection error.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Timeout error.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// Timeout duration.
        timeout: Duration,
    },

    /// Invalid response.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },
}

impl From<TransportError> for NexusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout } => NexusError::Timeout {
                message: "transport deadline exceeded".to_string(),
                timeout,
            },
            TransportError::Connection { message } | TransportError::InvalidResponse { message } => {
                NexusError::Network { message }
            }
        }
    }
}
