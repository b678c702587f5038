//! Tiered cache: in-memory L1, durable L2 and a local-disk fallback.
//!
//! The durable tier is guarded by a `"durable-store"` circuit breaker. While
//! it is open (or a call to it fails) reads are served from the local tier
//! and then from entries up to twice their TTL, and writes go to the local
//! tier. Nothing in this module surfaces a storage failure to the caller.

mod durable;
mod local;
mod memory;

pub use durable::{DurableStore, EntryMetadata, RestDurableStore, StoredEntry};
pub use local::LocalStore;

use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::errors::NexusResult;
use crate::observability::{default_metrics, MetricsCollector};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use memory::{Lifetime, MemoryTier};

/// Name of the breaker guarding the durable tier.
pub const DURABLE_STORE_RESOURCE: &str = "durable-store";

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// In-process memory.
    L1,
    /// Durable store.
    L2,
    /// Local disk.
    Local,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::Local => "local",
        };
        f.write_str(name)
    }
}

/// A cache lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// Serialized value.
    pub value: Bytes,
    /// Tier that served it.
    pub tier: CacheTier,
    /// True when the value is past its TTL (but within twice the TTL).
    pub stale: bool,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum L1 entries before insertion-order eviction.
    pub max_l1_entries: usize,
    /// Upper bound on how long an L1 entry stays fresh.
    pub l1_refresh: Duration,
    /// TTL used by callers that do not pick one.
    pub default_ttl: Duration,
    /// Directory of the local-disk tier.
    pub local_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_l1_entries: 500,
            l1_refresh: Duration::from_secs(600),
            default_ttl: Duration::from_secs(3600),
            local_dir: std::env::temp_dir().join("nexus_cache"),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the L1 capacity.
    pub fn max_l1_entries(mut self, max: usize) -> Self {
        self.max_l1_entries = max;
        self
    }

    /// Sets the L1 refresh window.
    pub fn l1_refresh(mut self, window: Duration) -> Self {
        self.l1_refresh = window;
        self
    }

    /// Sets the default TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the local-tier directory.
    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = dir.into();
        self
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held in L1.
    pub l1_entries: usize,
    /// Status of the durable-store breaker.
    pub durable_breaker: CircuitState,
}

/// The three-tier cache.
pub struct TieredCache {
    config: CacheConfig,
    memory: MemoryTier,
    durable: Arc<dyn DurableStore>,
    local: LocalStore,
    breaker: CircuitBreaker,
    metrics: Arc<dyn MetricsCollector>,
}

impl TieredCache {
    /// Creates a cache over `durable`, guarded by a breaker with `breaker_config`.
    pub fn new(
        config: CacheConfig,
        breaker_config: CircuitBreakerConfig,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            memory: MemoryTier::new(config.max_l1_entries),
            local: LocalStore::new(config.local_dir.clone()),
            breaker: CircuitBreaker::new(DURABLE_STORE_RESOURCE, breaker_config),
            durable,
            config,
            metrics: default_metrics(),
        }
    }

    /// Records hits, misses and breaker transitions in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.breaker = self.breaker.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the durable-store breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns the local-disk tier.
    pub fn local_store(&self) -> &LocalStore {
        &self.local
    }

    /// Looks `key` up in L1, then L2, then the local tier.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<CacheHit> {
        if let Some(value) = self.memory.get(key).await {
            return Some(self.record(
                key,
                CacheHit {
                    value,
                    tier: CacheTier::L1,
                    stale: false,
                },
            ));
        }

        let from_store = self
            .breaker
            .execute(
                || self.read_durable(key),
                || async { Ok(self.read_fallback(key).await) },
            )
            .await;

        let hit = match from_store {
            Ok(Some(hit)) => Some(hit),
            // The store answered but has nothing fresh; writes made while it
            // was unreachable may still be on disk.
            Ok(None) => self.read_local_fresh(key).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        };

        match hit {
            Some(hit) => Some(self.record(key, hit)),
            None => {
                tracing::debug!(key = %key, "Cache miss");
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// Writes `value` to L1 and to the durable tier (or the local tier when
    /// the durable tier is unavailable).
    #[instrument(skip(self, value), fields(bytes = value.len()))]
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.memory
            .insert(key, value.clone(), Lifetime::new(ttl, self.config.l1_refresh))
            .await;

        let entry = StoredEntry {
            value: value.clone(),
            metadata: EntryMetadata::now(ttl),
        };
        let result = self
            .breaker
            .execute(
                || self.durable.write(key, entry),
                || self.local.write(key, &value, ttl),
            )
            .await;

        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// Values are stored as JSON. If `compute` fails and a value no older
    /// than twice its TTL exists, that value is returned instead of the
    /// error. Concurrent misses for the same key each run `compute`.
    #[instrument(skip(self, compute))]
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            match serde_json::from_slice::<T>(&hit.value) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(key = %key, tier = %hit.tier, error = %e, "Discarding undecodable cache entry");
                }
            }
        }

        match compute().await {
            Ok(value) => {
                match serde_json::to_vec(&value) {
                    Ok(bytes) => self.set(key, Bytes::from(bytes), ttl).await,
                    Err(e) => tracing::warn!(key = %key, error = %e, "Computed value not cacheable"),
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(hit) = self.stale_lookup(key).await {
                    if let Ok(value) = serde_json::from_slice::<T>(&hit.value) {
                        tracing::warn!(key = %key, tier = %hit.tier, error = %err, "Compute failed, serving stale value");
                        self.metrics.record_cache_hit(hit.tier, true);
                        return Ok(value);
                    }
                }
                Err(err)
            }
        }
    }

    /// Reads L1 and the local tier accepting entries up to twice their TTL.
    /// Never touches the durable tier.
    #[instrument(skip(self))]
    pub async fn get_stale(&self, key: &str) -> Option<CacheHit> {
        let hit = self.stale_lookup(key).await;
        match &hit {
            Some(hit) => self.metrics.record_cache_hit(hit.tier, hit.stale),
            None => self.metrics.record_cache_miss(),
        }
        hit
    }

    /// Removes `key` from every tier.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key).await;

        let result = self
            .breaker
            .execute(|| self.durable.remove(key), || async { Ok(()) })
            .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Durable invalidation failed");
        }
        if let Err(e) = self.local.remove(key).await {
            tracing::warn!(key = %key, error = %e, "Local invalidation failed");
        }
    }

    /// Drops every L1 entry.
    pub async fn clear_l1(&self) {
        self.memory.clear().await;
        tracing::info!("L1 cache cleared");
    }

    /// Returns current statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.memory.len().await,
            durable_breaker: self.breaker.state().await,
        }
    }

    async fn read_durable(&self, key: &str) -> NexusResult<Option<CacheHit>> {
        let now = Utc::now();
        let entry = match self.durable.read(key).await? {
            Some(entry) if entry.metadata.is_fresh_at(now) => entry,
            _ => return Ok(None),
        };

        let lifetime = Lifetime::new(entry.metadata.ttl(), self.config.l1_refresh)
            .aged(entry.metadata.age_at(now));
        self.memory.insert(key, entry.value.clone(), lifetime).await;

        Ok(Some(CacheHit {
            value: entry.value,
            tier: CacheTier::L2,
            stale: false,
        }))
    }

    async fn read_fallback(&self, key: &str) -> Option<CacheHit> {
        match self.read_local_fresh(key).await {
            Some(hit) => Some(hit),
            None => self.stale_lookup(key).await,
        }
    }

    async fn read_local_fresh(&self, key: &str) -> Option<CacheHit> {
        match self.local.read(key).await {
            Ok(Some(entry)) if entry.is_fresh() => Some(CacheHit {
                value: entry.value,
                tier: CacheTier::Local,
                stale: false,
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Local cache read failed");
                None
            }
        }
    }

    async fn stale_lookup(&self, key: &str) -> Option<CacheHit> {
        if let Some((value, stale)) = self.memory.get_stale(key).await {
            return Some(CacheHit {
                value,
                tier: CacheTier::L1,
                stale,
            });
        }

        match self.local.read(key).await {
            Ok(Some(entry)) => Some(CacheHit {
                stale: !entry.is_fresh(),
                value: entry.value,
                tier: CacheTier::Local,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Local cache read failed");
                None
            }
        }
    }

    fn record(&self, key: &str, hit: CacheHit) -> CacheHit {
        if hit.stale {
            tracing::warn!(key = %key, tier = %hit.tier, "Serving stale cache entry");
        } else {
            tracing::info!(key = %key, tier = %hit.tier, "Cache hit");
        }
        self.metrics.record_cache_hit(hit.tier, hit.stale);
        hit
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
