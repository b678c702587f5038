//! Mock implementations for testing.
//!
//! Provides a scripted provider handler, a failure-injecting durable store
//! and a mock transport, so the cascade, cache and HTTP handlers can be
//! exercised without network access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::{DurableStore, StoredEntry};
use crate::errors::{NexusError, NexusResult};
use crate::providers::ProviderHandler;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One scripted provider behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Answer with the text.
    Reply(String),
    /// Fail with HTTP 429, optionally carrying `retry-after`.
    RateLimited(Option<Duration>),
    /// Fail with HTTP 401.
    Unauthorized,
    /// Fail with the given 5xx status.
    ServerError(u16),
    /// Fail with a network error.
    NetworkError,
    /// Answer with the text after the delay.
    Delayed(Duration, String),
    /// Never answer.
    Hang,
}

impl ScriptStep {
    /// Shorthand for [`ScriptStep::Reply`].
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Reply(text.into())
    }

    async fn run(self) -> NexusResult<String> {
        match self {
            ScriptStep::Reply(text) => Ok(text),
            ScriptStep::RateLimited(retry_after) => Err(NexusError::RateLimited {
                message: "scripted rate limit".to_string(),
                retry_after,
            }),
            ScriptStep::Unauthorized => Err(NexusError::Authentication {
                message: "scripted invalid key".to_string(),
            }),
            ScriptStep::ServerError(status_code) => Err(NexusError::Server {
                message: "scripted server error".to_string(),
                status_code,
            }),
            ScriptStep::NetworkError => Err(NexusError::Network {
                message: "scripted connection reset".to_string(),
            }),
            ScriptStep::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            ScriptStep::Hang => futures::future::pending().await,
        }
    }
}

/// A recorded provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Prompt sent.
    pub prompt: String,
    /// Model requested.
    pub model: String,
}

/// Provider handler that plays back a script.
///
/// Queued steps are consumed in order; once the queue is empty every call
/// runs the default step.
#[derive(Debug)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    default_step: ScriptStep,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// Creates a provider that always runs `step`.
    pub fn always(step: ScriptStep) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default_step: step,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a provider that runs `steps`, then `default_step` forever.
    pub fn sequence(steps: impl IntoIterator<Item = ScriptStep>, default_step: ScriptStep) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            default_step,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues another step.
    pub fn push(&self, step: ScriptStep) {
        lock(&self.steps).push_back(step);
    }

    /// Invocations so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl ProviderHandler for ScriptedProvider {
    async fn invoke(&self, prompt: &str, model: &str) -> NexusResult<String> {
        lock(&self.calls).push(RecordedCall {
            prompt: prompt.to_string(),
            model: model.to_string(),
        });
        let step = lock(&self.steps)
            .pop_front()
            .unwrap_or_else(|| self.default_step.clone());
        step.run().await
    }
}

/// In-memory durable store with failure injection and call counters.
#[derive(Debug, Default)]
pub struct MockDurableStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    failing: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
}

impl MockDurableStore {
    /// Creates an empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Inserts an entry directly, bypassing counters and failure injection.
    pub fn insert(&self, key: &str, entry: StoredEntry) {
        lock(&self.entries).insert(key.to_string(), entry);
    }

    /// Returns an entry directly.
    pub fn entry(&self, key: &str) -> Option<StoredEntry> {
        lock(&self.entries).get(key).cloned()
    }

    /// Moves an entry's write time `age` into the past.
    pub fn backdate(&self, key: &str, age: Duration) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(key) {
            if let Some(written_at) = chrono::Duration::from_std(age)
                .ok()
                .and_then(|age| entry.metadata.written_at.checked_sub_signed(age))
            {
                entry.metadata.written_at = written_at;
            }
        }
    }

    /// Number of `read` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `remove` calls.
    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    fn check(&self) -> NexusResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NexusError::store_unavailable("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MockDurableStore {
    async fn read(&self, key: &str) -> NexusResult<Option<StoredEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.entry(key))
    }

    async fn write(&self, key: &str, entry: StoredEntry) -> NexusResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> NexusResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Mock HTTP transport for testing.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    default_response: Mutex<Option<MockResponse>>,
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path.
    pub path: String,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Request headers.
    pub headers: HashMap<String, String>,
}

/// A mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl MockResponse {
    /// Creates a successful JSON response.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status: 200,
            headers,
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Creates a successful plain-text response.
    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    /// Creates an error response.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(&serde_json::json!({ "error": { "message": message } })).with_status(status)
    }

    /// Sets the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header (name stored lower-case).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Sets the response used once the queue is empty.
    pub fn set_default(&self, response: MockResponse) {
        *lock(&self.default_response) = Some(response);
    }

    /// All recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// The last recorded request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Number of requests made.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_response(&self) -> MockResponse {
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            lock(&self.default_response)
                .clone()
                .unwrap_or_else(|| MockResponse::error(500, "No mock response configured"))
        })
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(RecordedRequest {
            method: request.method,
            path: request.path,
            body: request.body,
            headers: request.headers,
        });

        let response = self.next_response();
        Ok(HttpResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("request_count", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryMetadata, RestDurableStore};
    use crate::providers::{OpenAiCompatibleProvider, PlainTextProvider};
    use bytes::Bytes;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scripted_provider_sequence_then_default() {
        let provider = ScriptedProvider::sequence(
            [ScriptStep::RateLimited(None)],
            ScriptStep::reply("steady answer"),
        );

        assert!(provider.invoke("p", "m").await.is_err());
        assert_eq!(provider.invoke("p", "m").await.unwrap(), "steady answer");
        assert_eq!(provider.invoke("p", "m2").await.unwrap(), "steady answer");
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.calls()[2].model, "m2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_step_waits_before_answering() {
        let provider = ScriptedProvider::always(ScriptStep::Delayed(
            Duration::from_secs(5),
            "late answer".to_string(),
        ));

        let started = tokio::time::Instant::now();
        assert_eq!(provider.invoke("p", "m").await.unwrap(), "late answer");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mock_store_failure_injection() {
        let store = MockDurableStore::new();
        let entry = StoredEntry {
            value: Bytes::from_static(b"1"),
            metadata: EntryMetadata::now(Duration::from_secs(60)),
        };
        store.write("k", entry.clone()).await.unwrap();

        store.set_failing(true);
        assert!(matches!(
            store.read("k").await,
            Err(NexusError::DurableStoreUnavailable { .. })
        ));

        store.set_failing(false);
        assert_eq!(store.read("k").await.unwrap(), Some(entry));
        assert_eq!(store.reads(), 2);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn test_backdate_ages_entry() {
        let store = MockDurableStore::new();
        store.insert(
            "k",
            StoredEntry {
                value: Bytes::from_static(b"1"),
                metadata: EntryMetadata::now(Duration::from_secs(60)),
            },
        );

        store.backdate("k", Duration::from_secs(90));

        let metadata = store.entry("k").unwrap().metadata;
        assert!(!metadata.is_fresh_at(chrono::Utc::now()));
        assert!(metadata.age_at(chrono::Utc::now()) >= Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_mock_transport_drives_openai_provider() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockResponse::json(&serde_json::json!({
            "choices": [{"message": {"content": "mocked completion"}}]
        })));

        let provider = OpenAiCompatibleProvider::new("mock", transport.clone());
        assert_eq!(provider.invoke("hi", "m").await.unwrap(), "mocked completion");

        let request = transport.last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "chat/completions");
    }

    #[tokio::test]
    async fn test_mock_transport_rate_limit_header() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockResponse::error(429, "slow down").with_header("Retry-After", "4"));

        let provider = PlainTextProvider::new("mock", transport);
        let err = provider.invoke("hi", "m").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_mock_transport_drives_rest_store() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default(MockResponse::error(404, "not found"));

        let store = RestDurableStore::new(transport.clone());
        assert!(store.read("missing key").await.unwrap().is_none());
        assert_eq!(transport.last_request().unwrap().path, "missing+key");
    }
}
