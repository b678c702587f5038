//! AI provider descriptors and HTTP handlers.
//!
//! A provider is a named endpoint serving an ordered list of models. The
//! cascade only sees the [`ProviderHandler`] seam; the handlers here speak
//! HTTP through the crate's transport.

mod openai;
mod plain;

pub use openai::OpenAiCompatibleProvider;
pub use plain::{PlainTextProvider, PLAIN_TEXT_TIMEOUT};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{NexusError, NexusResult};
use crate::transport::HttpResponse;

/// Default per-invocation deadline.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Invokes one model of one provider.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// Sends `prompt` to `model` and returns the raw answer text.
    async fn invoke(&self, prompt: &str, model: &str) -> NexusResult<String>;
}

/// An AI provider in the cascade. Immutable once built.
#[derive(Clone)]
pub struct ProviderDescriptor {
    name: String,
    models: Vec<String>,
    handler: Arc<dyn ProviderHandler>,
    timeout: Duration,
    permissive: bool,
}

impl ProviderDescriptor {
    /// Creates a descriptor with no models, the default timeout and
    /// `permissive = false`.
    pub fn new(name: impl Into<String>, handler: Arc<dyn ProviderHandler>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
            handler,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            permissive: false,
        }
    }

    /// Sets the models, tried in the given order.
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-invocation deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the provider as eligible for softened prompts after a refusal.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Models in cascade order.
    pub fn model_list(&self) -> &[String] {
        &self.models
    }

    /// Invocation handler.
    pub fn handler(&self) -> &Arc<dyn ProviderHandler> {
        &self.handler
    }

    /// Per-invocation deadline.
    pub fn invoke_timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether softened prompts are sent to this provider.
    pub fn is_permissive(&self) -> bool {
        self.permissive
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("models", &self.models)
            .field("timeout", &self.timeout)
            .field("permissive", &self.permissive)
            .finish()
    }
}

/// Maps a non-2xx response onto the error taxonomy.
pub(crate) fn error_from_response(provider: &str, response: &HttpResponse) -> NexusError {
    let body = response.text();
    match NexusError::from_status(response.status, &body, retry_after(&response.headers)) {
        NexusError::ContentFiltered { message, .. } => NexusError::ContentFiltered {
            provider: provider.to_string(),
            message,
        },
        other => other,
    }
}

/// Reads the server-requested wait from `retry-after` or the
/// `x-ratelimit-reset-*` headers.
pub(crate) fn retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| parse_wait(v)))
}

/// Parses `"2"`, `"1.5"`, `"250ms"`, `"6s"` or `"1m"`.
fn parse_wait(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs
            .parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2", Some(Duration::from_secs(2)) ; "plain seconds")]
    #[test_case("1.5", Some(Duration::from_millis(1500)) ; "fractional seconds")]
    #[test_case("250ms", Some(Duration::from_millis(250)) ; "milliseconds")]
    #[test_case("6s", Some(Duration::from_secs(6)) ; "seconds suffix")]
    #[test_case("1m", Some(Duration::from_secs(60)) ; "minutes")]
    #[test_case("Wed, 21 Oct 2015 07:28:00 GMT", None ; "http date unsupported")]
    #[test_case("-3", None ; "negative")]
    #[test_case("307445734561825861m", None ; "minutes overflow")]
    #[test_case("1e30s", None ; "seconds overflow")]
    fn test_parse_wait(input: &str, expected: Option<Duration>) {
        assert_eq!(parse_wait(input), expected);
    }

    #[test]
    fn test_retry_after_header_precedence() {
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-reset-requests".to_string(), "9s".to_string());
        headers.insert("retry-after".to_string(), "3".to_string());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_filtered_error_names_provider() {
        let response = HttpResponse {
            status: 400,
            headers: HashMap::new(),
            body: br#"{"error":"content_filter triggered"}"#.to_vec(),
        };
        match error_from_response("acme", &response) {
            NexusError::ContentFiltered { provider, .. } => assert_eq!(provider, "acme"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
