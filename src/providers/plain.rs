//! Plain-text completion handler.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{error_from_response, ProviderDescriptor, ProviderHandler};
use crate::config::ProviderConfig;
use crate::errors::NexusResult;
use crate::transport::{HttpRequest, HttpTransport, HttpTransportImpl};

/// Deadline used for plain-text endpoints, which answer slowly.
pub const PLAIN_TEXT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct PlainRequest<'a> {
    messages: Vec<Message<'a>>,
    model: &'a str,
    seed: u32,
}

/// Handler for endpoints that take a message list at the base URL and
/// answer with the completion as the raw response body.
///
/// A random `seed` is sent with every call so the endpoint does not serve a
/// cached answer to a retried prompt.
pub struct PlainTextProvider {
    name: String,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl PlainTextProvider {
    /// Creates a handler over an existing transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout: PLAIN_TEXT_TIMEOUT,
        }
    }

    /// Creates a handler from provider configuration. The request deadline
    /// is never shorter than [`PLAIN_TEXT_TIMEOUT`].
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> NexusResult<Self> {
        let timeout = config.timeout.max(PLAIN_TEXT_TIMEOUT);
        let transport = HttpTransportImpl::new(config.base_url.as_str(), timeout)?;
        let mut provider = Self::new(name, Arc::new(transport));
        provider.timeout = timeout;
        Ok(provider)
    }

    /// Wraps the handler in a descriptor carrying the plain-text deadline.
    pub fn into_descriptor(self) -> ProviderDescriptor {
        let timeout = self.timeout;
        ProviderDescriptor::new(self.name.clone(), Arc::new(self)).timeout(timeout)
    }
}

#[async_trait]
impl ProviderHandler for PlainTextProvider {
    #[instrument(skip(self, prompt), fields(provider = %self.name))]
    async fn invoke(&self, prompt: &str, model: &str) -> NexusResult<String> {
        let body = PlainRequest {
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            model,
            seed: rand::thread_rng().gen_range(0..1_000_000),
        };

        let response = self.transport.send(HttpRequest::post("").with_json(&body)?).await?;
        if !response.is_success() {
            return Err(error_from_response(&self.name, &response));
        }
        Ok(response.text().trim().to_string())
    }
}

impl std::fmt::Debug for PlainTextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextProvider")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
