//! OpenAI-compatible chat completions handler.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use super::{error_from_response, ProviderHandler};
use crate::config::ProviderConfig;
use crate::errors::{NexusError, NexusResult};
use crate::transport::{HttpRequest, HttpTransport, HttpTransportImpl};

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Handler for any endpoint implementing `POST chat/completions`.
pub struct OpenAiCompatibleProvider {
    name: String,
    transport: Arc<dyn HttpTransport>,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleProvider {
    /// Creates a handler over an existing transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            api_key: None,
        }
    }

    /// Creates a handler from provider configuration.
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> NexusResult<Self> {
        let transport = HttpTransportImpl::new(config.base_url.as_str(), config.timeout)?;
        let mut provider = Self::new(name, Arc::new(transport));
        provider.api_key = config.api_key.clone();
        Ok(provider)
    }

    /// Sends the key as a bearer token.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

#[async_trait]
impl ProviderHandler for OpenAiCompatibleProvider {
    #[instrument(skip(self, prompt), fields(provider = %self.name))]
    async fn invoke(&self, prompt: &str, model: &str) -> NexusResult<String> {
        let body = CompletionRequest {
            model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };
        let mut request = HttpRequest::post("chat/completions").with_json(&body)?;
        if let Some(key) = &self.api_key {
            request = request.with_header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(error_from_response(&self.name, &response));
        }

        let parsed: CompletionResponse = response.json().map_err(|e| NexusError::Server {
            message: format!("Failed to parse response: {}", e),
            status_code: response.status,
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("name", &self.name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
