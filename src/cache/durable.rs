//! Durable (L2) store abstraction and the REST-backed implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::errors::{NexusError, NexusResult};
use crate::transport::{HttpRequest, HttpTransport};

/// When an entry was written and for how long it is fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Write time.
    pub written_at: DateTime<Utc>,
    /// Freshness window in seconds.
    pub ttl_secs: u64,
}

impl EntryMetadata {
    /// Metadata for an entry written now.
    pub fn now(ttl: Duration) -> Self {
        Self {
            written_at: Utc::now(),
            ttl_secs: whole_secs(ttl),
        }
    }

    /// Returns the TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Age at `now`; zero for entries written in the future.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or_default()
    }

    /// Whether the entry is still within its TTL at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) < self.ttl()
    }

    /// Time left before the entry goes stale at `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.ttl().saturating_sub(self.age_at(now))
    }
}

/// `ttl` in whole seconds, rounded up so a sub-second TTL is not stored as 0.
pub(crate) fn whole_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

/// A value held by the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Serialized value.
    pub value: Bytes,
    /// Write metadata.
    pub metadata: EntryMetadata,
}

/// Key-value store backing the L2 tier.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads an entry; `Ok(None)` when the key is absent.
    async fn read(&self, key: &str) -> NexusResult<Option<StoredEntry>>;

    /// Writes (or replaces) an entry.
    async fn write(&self, key: &str, entry: StoredEntry) -> NexusResult<()>;

    /// Removes an entry. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> NexusResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RestEnvelope {
    value: String,
    written_at: DateTime<Utc>,
    ttl_secs: u64,
}

/// Durable store speaking a small REST protocol.
///
/// `GET`, `PUT` and `DELETE` on `<base>/<urlencoded key>`; bodies are a JSON
/// envelope with the value base64-encoded. `404` on read is a miss.
pub struct RestDurableStore {
    transport: Arc<dyn HttpTransport>,
    api_key: Option<SecretString>,
}

impl RestDurableStore {
    /// Creates a store over the given transport.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            api_key: None,
        }
    }

    /// Sends `Authorization: Bearer <key>` on every request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    fn path(key: &str) -> String {
        url::form_urlencoded::byte_serialize(key.as_bytes()).collect()
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match &self.api_key {
            Some(key) => request.with_header(
                "Authorization",
                format!("Bearer {}", key.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send(&self, request: HttpRequest) -> NexusResult<crate::transport::HttpResponse> {
        self.transport
            .send(self.authorize(request))
            .await
            .map_err(|e| NexusError::store_unavailable(e.to_string()))
    }
}

fn unexpected(status: u16, body: &str) -> NexusError {
    NexusError::store_unavailable(format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()))
}

#[async_trait]
impl DurableStore for RestDurableStore {
    #[instrument(skip(self))]
    async fn read(&self, key: &str) -> NexusResult<Option<StoredEntry>> {
        let response = self.send(HttpRequest::get(Self::path(key))).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(unexpected(response.status, &response.text()));
        }

        let envelope: RestEnvelope = response.json()?;
        let value = BASE64
            .decode(envelope.value.as_bytes())
            .map_err(|e| NexusError::Serialization {
                message: e.to_string(),
            })?;

        Ok(Some(StoredEntry {
            value: Bytes::from(value),
            metadata: EntryMetadata {
                written_at: envelope.written_at,
                ttl_secs: envelope.ttl_secs,
            },
        }))
    }

    #[instrument(skip(self, entry))]
    async fn write(&self, key: &str, entry: StoredEntry) -> NexusResult<()> {
        let envelope = RestEnvelope {
            value: BASE64.encode(&entry.value),
            written_at: entry.metadata.written_at,
            ttl_secs: entry.metadata.ttl_secs,
        };
        let response = self
            .send(HttpRequest::put(Self::path(key)).with_json(&envelope)?)
            .await?;
        if !response.is_success() {
            return Err(unexpected(response.status, &response.text()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> NexusResult<()> {
        let response = self.send(HttpRequest::delete(Self::path(key))).await?;
        if response.is_success() || response.status == 404 {
            Ok(())
        } else {
            Err(unexpected(response.status, &response.text()))
        }
    }
}

impl std::fmt::Debug for RestDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDurableStore")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransportImpl;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> RestDurableStore {
        let transport = HttpTransportImpl::new(server.uri(), Duration::from_secs(5)).unwrap();
        RestDurableStore::new(Arc::new(transport))
    }

    #[test]
    fn test_metadata_freshness() {
        let written_at = Utc::now() - chrono::Duration::seconds(30);
        let meta = EntryMetadata {
            written_at,
            ttl_secs: 60,
        };
        let now = written_at + chrono::Duration::seconds(30);
        assert!(meta.is_fresh_at(now));
        assert_eq!(meta.remaining_at(now), Duration::from_secs(30));
        assert!(!meta.is_fresh_at(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let meta = EntryMetadata::now(Duration::from_millis(500));
        assert_eq!(meta.ttl_secs, 1);
        assert!(meta.is_fresh_at(meta.written_at));
        assert_eq!(EntryMetadata::now(Duration::from_secs(3)).ttl_secs, 3);
    }

    #[tokio::test]
    async fn test_read_decodes_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search%3Alula"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": BASE64.encode(b"{\"a\":1}"),
                "written_at": "2026-01-01T00:00:00Z",
                "ttl_secs": 3600
            })))
            .mount(&server)
            .await;

        let entry = store(&server).await.read("search:lula").await.unwrap().unwrap();
        assert_eq!(&entry.value[..], b"{\"a\":1}");
        assert_eq!(entry.metadata.ttl_secs, 3600);
    }

    #[tokio::test]
    async fn test_read_404_is_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(store(&server).await.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_store_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = store(&server).await.read("k").await.unwrap_err();
        assert!(matches!(err, NexusError::DurableStoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_write_sends_bearer_and_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/k"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server)
            .await
            .with_api_key(SecretString::new("secret".to_string()));
        store
            .write(
                "k",
                StoredEntry {
                    value: Bytes::from_static(b"1"),
                    metadata: EntryMetadata::now(Duration::from_secs(60)),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        store(&server).await.remove("gone").await.unwrap();
    }
}
